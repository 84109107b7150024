use bson::Document;
use thiserror::Error;

use crate::{
    classify::codes,
    error::{ErrorDomain, LowLevelError},
};

pub const OP_MSG: i32 = 2013;
pub const HEADER_LEN: usize = 16;
/// Largest message a server will send.
pub const MAX_MESSAGE_SIZE: usize = 48_000_000;

const CHECKSUM_PRESENT: u32 = 1;
const CHECKSUM_LEN: usize = 4;

const SECTION_BODY: u8 = 0;
const SECTION_SEQUENCE: u8 = 1;

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("unsupported opcode {0}")]
    OpCode(i32),
    #[error("message length {0} is out of bounds")]
    Length(i64),
    #[error("unknown section kind {0}")]
    SectionKind(u8),
    #[error("truncated message section")]
    Truncated,
    #[error("message has no body section")]
    MissingBody,
    #[error("failed to decode message body: {0}")]
    Decode(#[from] bson::de::Error),
    #[error("failed to encode message body: {0}")]
    Encode(#[from] bson::ser::Error),
}

impl From<MessageError> for LowLevelError {
    fn from(error: MessageError) -> Self {
        let (domain, code) = match error {
            MessageError::Length(_) => (ErrorDomain::Client, codes::CLIENT_TOO_BIG),
            MessageError::Decode(_) | MessageError::Encode(_) => {
                (ErrorDomain::Bson, codes::BSON_INVALID)
            }
            _ => (ErrorDomain::Protocol, codes::PROTOCOL_INVALID_REPLY),
        };
        LowLevelError::new(domain, code, error.to_string())
    }
}

fn le_i32(bytes: &[u8], at: usize) -> i32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[at..at + 4]);
    i32::from_le_bytes(raw)
}

/// Fixed-size prefix of every wire message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Total message length, header included.
    pub length: i32,
    pub request_id: i32,
    pub response_to: i32,
    pub op_code: i32,
}

impl MessageHeader {
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&self.length.to_le_bytes());
        out[4..8].copy_from_slice(&self.request_id.to_le_bytes());
        out[8..12].copy_from_slice(&self.response_to.to_le_bytes());
        out[12..16].copy_from_slice(&self.op_code.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8; HEADER_LEN]) -> Self {
        Self {
            length: le_i32(bytes, 0),
            request_id: le_i32(bytes, 4),
            response_to: le_i32(bytes, 8),
            op_code: le_i32(bytes, 12),
        }
    }

    /// Bytes that follow the header, checked against the message size limits.
    pub fn payload_len(&self) -> Result<usize, MessageError> {
        let length = usize::try_from(self.length)
            .map_err(|_| MessageError::Length(i64::from(self.length)))?;
        // flag bits plus at least one section kind byte
        if length < HEADER_LEN + 5 || length > MAX_MESSAGE_SIZE {
            return Err(MessageError::Length(i64::from(self.length)));
        }
        Ok(length - HEADER_LEN)
    }
}

/// An `OP_MSG` carrying one body document.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub request_id: i32,
    pub response_to: i32,
    pub flags: u32,
    pub body: Document,
}

impl Message {
    pub fn new(request_id: i32, body: Document) -> Self {
        Self {
            request_id,
            response_to: 0,
            flags: 0,
            body,
        }
    }

    pub fn reply(request_id: i32, response_to: i32, body: Document) -> Self {
        Self {
            request_id,
            response_to,
            flags: 0,
            body,
        }
    }

    /// Header and payload, ready to go out as two buffers of one write.
    pub fn encode(&self) -> Result<(MessageHeader, Vec<u8>), MessageError> {
        let mut payload = Vec::with_capacity(64);
        payload.extend_from_slice(&self.flags.to_le_bytes());
        payload.push(SECTION_BODY);
        self.body.to_writer(&mut payload)?;

        let length = HEADER_LEN + payload.len();
        if length > MAX_MESSAGE_SIZE {
            return Err(MessageError::Length(length as i64));
        }

        let header = MessageHeader {
            length: length as i32,
            request_id: self.request_id,
            response_to: self.response_to,
            op_code: OP_MSG,
        };
        Ok((header, payload))
    }

    /// Reads the body section of `payload`; document sequences are skipped and a trailing
    /// checksum is ignored.
    pub fn decode(header: &MessageHeader, payload: &[u8]) -> Result<Self, MessageError> {
        if header.op_code != OP_MSG {
            return Err(MessageError::OpCode(header.op_code));
        }
        if payload.len() < 4 {
            return Err(MessageError::Truncated);
        }

        let flags = le_i32(payload, 0) as u32;
        let mut end = payload.len();
        if flags & CHECKSUM_PRESENT != 0 {
            end = end
                .checked_sub(CHECKSUM_LEN)
                .ok_or(MessageError::Truncated)?;
        }

        let mut body = None;
        let mut at = 4;
        while at < end {
            let kind = payload[at];
            at += 1;

            if at + 4 > end {
                return Err(MessageError::Truncated);
            }
            let len = usize::try_from(le_i32(payload, at)).map_err(|_| MessageError::Truncated)?;
            if len < 4 || at + len > end {
                return Err(MessageError::Truncated);
            }

            match kind {
                SECTION_BODY => {
                    let mut section = &payload[at..at + len];
                    body = Some(Document::from_reader(&mut section)?);
                }
                SECTION_SEQUENCE => {}
                other => return Err(MessageError::SectionKind(other)),
            }
            at += len;
        }

        Ok(Self {
            request_id: header.request_id,
            response_to: header.response_to,
            flags,
            body: body.ok_or(MessageError::MissingBody)?,
        })
    }
}
