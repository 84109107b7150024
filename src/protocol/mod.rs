//! Default driver: `OP_MSG` over a single connection.
//!
//! This module implements the [`Client`](crate::client::Client) boundary on top of the
//! [transport adapter](crate::transport), so the execution layer can run end to end
//! without an external driver.
//!
//! # Binary Format
//!
//! Every message is an `OP_MSG` (opcode 2013):
//!
//! - a 16-byte header of little-endian `i32`s: total length, request id, the request id
//!   being answered, and the opcode,
//! - `u32` flag bits,
//! - one kind-0 section holding the BSON body document.
//!
//! Requests leave as two buffers (header, payload) in one vectored write. Replies are read
//! as a 16-byte header followed by exactly the announced remainder, capped at
//! [`MAX_MESSAGE_SIZE`]. Document-sequence sections and checksums in replies are skipped.
//!
//! # Commands
//!
//! Writes are sent as `insert`/`update`/`delete` commands, one per run of same-kind
//! operations. Queries become `find` commands followed by `getMore`, and open server
//! cursors are closed with `killCursors` when the client-side cursor is dropped.
//! Topology discovery, pooling and authentication are out of scope: the client has one
//! connection, identified as server 1.
mod client;
mod connection;
mod cursor;
mod message;
#[cfg(test)]
mod server;

pub use client::{SERVER_ID, WireClient};
pub use connection::{Connection, check_ok};
pub use cursor::{WireCursor, find_command};
pub use message::{HEADER_LEN, MAX_MESSAGE_SIZE, Message, MessageError, MessageHeader, OP_MSG};
