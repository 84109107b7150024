use std::time::Duration;

use bson::{Bson, Document};
use log::{debug, trace};

use crate::{
    classify::codes,
    error::{ErrorDomain, LowLevelError},
    transport::{StreamPrimitive, TransportError, TransportHandle},
};

use super::message::{HEADER_LEN, Message, MessageHeader};

/// One server connection: request/reply round trips over a transport handle.
///
/// A transport failure or an unreadable reply header in the middle of a round trip leaves
/// the stream out of sync, so the handle is closed and every later request fails as not
/// established. A peer that hung up between round trips is noticed before sending.
pub struct Connection<S: StreamPrimitive> {
    handle: TransportHandle<S>,
    timeout: Duration,
    next_request_id: i32,
    debug: bool,
}

impl<S: StreamPrimitive> Connection<S> {
    pub fn new(handle: TransportHandle<S>, timeout: Duration, debug: bool) -> Self {
        Self {
            handle,
            timeout,
            next_request_id: 0,
            debug,
        }
    }

    pub fn handle(&self) -> &TransportHandle<S> {
        &self.handle
    }

    fn request_id(&mut self) -> i32 {
        self.next_request_id = self.next_request_id.wrapping_add(1);
        self.next_request_id
    }

    fn close_after_failure(&mut self) {
        if let Err(e) = self.handle.close() {
            debug!("closing '{}' after failure: {e}", self.handle.endpoint().dsn());
        }
    }

    fn broken(&mut self, error: TransportError) -> LowLevelError {
        self.close_after_failure();
        error.into()
    }

    fn ensure_alive(&mut self) -> Result<(), LowLevelError> {
        if self.handle.is_alive() {
            return Ok(());
        }

        let dsn = self.handle.endpoint().dsn();
        self.close_after_failure();
        Err(LowLevelError::new(
            ErrorDomain::Stream,
            codes::STREAM_NOT_ESTABLISHED,
            format!("Connection to '{dsn}' is no longer alive"),
        ))
    }

    /// Sends `body` and returns the reply body.
    pub fn send(&mut self, body: Document) -> Result<Document, LowLevelError> {
        self.ensure_alive()?;
        let request_id = self.request_id();
        let (header, payload) = Message::new(request_id, body).encode()?;
        let header = header.to_bytes();

        if let Err(e) = self.handle.write(&[&header, &payload], self.timeout) {
            return Err(self.broken(e));
        }

        let mut reply_header = [0u8; HEADER_LEN];
        if let Err(e) = self
            .handle
            .read(&mut [&mut reply_header[..]], HEADER_LEN, self.timeout)
        {
            return Err(self.broken(e));
        }
        let reply_header = MessageHeader::from_bytes(&reply_header);

        let len = match reply_header.payload_len() {
            Ok(len) => len,
            Err(e) => {
                self.close_after_failure();
                return Err(e.into());
            }
        };
        let mut payload = vec![0u8; len];
        if let Err(e) = self.handle.read(&mut [&mut payload[..]], len, self.timeout) {
            return Err(self.broken(e));
        }

        let reply = Message::decode(&reply_header, &payload)?;
        if reply.response_to != request_id {
            return Err(LowLevelError::new(
                ErrorDomain::Protocol,
                codes::PROTOCOL_INVALID_REPLY,
                format!(
                    "reply answers request {} but {request_id} was sent",
                    reply.response_to
                ),
            ));
        }

        Ok(reply.body)
    }

    /// Runs `command` against database `db` and fails unless the reply reports `ok: 1`.
    pub fn command(&mut self, db: &str, command: &Document) -> Result<Document, LowLevelError> {
        let mut body = command.clone();
        body.insert("$db", db);

        if self.debug {
            let name = command.keys().next().map(String::as_str).unwrap_or_default();
            trace!("running '{name}' against '{db}'");
        }

        let reply = self.send(body)?;
        check_ok(&reply)?;
        Ok(reply)
    }
}

/// Turns a failed command reply into the error the server reported.
pub fn check_ok(reply: &Document) -> Result<(), LowLevelError> {
    let ok = match reply.get("ok") {
        Some(Bson::Double(v)) => *v == 1.0,
        Some(Bson::Int32(v)) => *v == 1,
        Some(Bson::Int64(v)) => *v == 1,
        Some(Bson::Boolean(v)) => *v,
        _ => false,
    };
    if ok {
        return Ok(());
    }

    let code = match reply.get("code") {
        Some(Bson::Int32(v)) => u32::try_from(*v).ok(),
        Some(Bson::Int64(v)) => u32::try_from(*v).ok(),
        Some(Bson::Double(v)) if *v >= 0.0 => Some(*v as u32),
        _ => None,
    };
    let message = reply.get_str("errmsg").unwrap_or("Unknown command failure");

    Err(LowLevelError::new(
        ErrorDomain::Query,
        code.unwrap_or(codes::QUERY_FAILURE),
        message,
    ))
}
