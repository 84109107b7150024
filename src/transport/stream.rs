//! The byte-stream boundary the transport runs on.
//!
//! A [`StreamPrimitive`] is an already-connected bidirectional byte stream supplied by the
//! hosting environment; a [`Connector`] opens one for an [`Endpoint`] and upgrades it to TLS
//! when asked. [`net`](super::net) provides the default std/rustls implementations.
use std::{
    io::{self, IoSlice},
    os::fd::RawFd,
    time::Duration,
};

use crate::config::TlsContext;

use super::{ConnectionIdentity, Endpoint, TransportError};

/// Socket-level tunables applied through [`StreamPrimitive::set_option`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketOption {
    NoDelay(bool),
    KeepAlive(bool),
    /// Passed to `setsockopt` unchanged.
    Raw { level: i32, name: i32, value: i32 },
}

pub trait StreamPrimitive {
    /// A single underlying read. Returning `Ok(0)` means the peer closed the stream.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize>;

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;

    fn set_write_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;

    fn set_option(&mut self, option: SocketOption) -> io::Result<()>;

    /// `false` once the peer has hung up or the stream has errored.
    fn check_liveness(&mut self) -> bool;

    /// Descriptor used for multiplexed polling; `None` when the stream has none.
    fn raw_fd(&self) -> Option<RawFd>;

    fn close(&mut self) -> io::Result<()>;
}

pub trait Connector {
    type Stream: StreamPrimitive;

    fn connect(
        &self,
        endpoint: &Endpoint,
        identity: &ConnectionIdentity,
        timeout: Duration,
    ) -> Result<Self::Stream, TransportError>;

    /// Upgrades `stream` in place. On failure the stream may be left half-negotiated;
    /// the caller closes it.
    fn upgrade_tls(
        &self,
        stream: &mut Self::Stream,
        endpoint: &Endpoint,
        context: &TlsContext,
        timeout: Duration,
    ) -> Result<(), TransportError>;
}
