//! Maps low-level failures onto the closed [`ErrorKind`] taxonomy.
//!
//! The mapping is evaluated code-first, then by domain. It is total: every
//! `(domain, code)` pair resolves to exactly one kind, and anything the table does not
//! recognize falls back to [`ErrorKind::Runtime`].
use log::error;

use crate::error::{ErrorDomain, ErrorKind};

/// Low-level error codes. Client and stream codes are driver-assigned; the rest are
/// reported by the server.
pub mod codes {
    pub const STREAM_INVALID_TYPE: u32 = 1;
    pub const STREAM_INVALID_STATE: u32 = 2;
    pub const STREAM_NAME_RESOLUTION: u32 = 3;
    pub const STREAM_SOCKET: u32 = 4;
    pub const STREAM_CONNECT: u32 = 5;
    pub const STREAM_NOT_ESTABLISHED: u32 = 6;

    pub const CLIENT_NOT_READY: u32 = 7;
    pub const CLIENT_TOO_BIG: u32 = 8;
    pub const CLIENT_TOO_SMALL: u32 = 9;
    pub const CLIENT_GETNONCE: u32 = 10;
    pub const CLIENT_AUTHENTICATE: u32 = 11;
    pub const CLIENT_NO_ACCEPTABLE_PEER: u32 = 12;
    pub const CLIENT_IN_EXHAUST: u32 = 13;

    pub const PROTOCOL_INVALID_REPLY: u32 = 14;
    pub const PROTOCOL_BAD_WIRE_VERSION: u32 = 15;
    pub const CURSOR_INVALID_CURSOR: u32 = 16;
    pub const QUERY_FAILURE: u32 = 17;
    pub const BSON_INVALID: u32 = 18;
    pub const MATCHER_INVALID: u32 = 19;
    pub const NAMESPACE_INVALID: u32 = 20;
    pub const COMMAND_INVALID_ARG: u32 = 22;
    pub const COLLECTION_INSERT_FAILED: u32 = 23;
    pub const GRIDFS_INVALID_FILENAME: u32 = 27;

    pub const EXCEEDED_TIME_LIMIT: u32 = 50;
    pub const QUERY_COMMAND_NOT_FOUND: u32 = 59;
    pub const DUPLICATE_KEY: u32 = 11000;
    pub const QUERY_NOT_TAILABLE: u32 = 13051;
}

/// Classifies a low-level failure.
pub fn classify(domain: ErrorDomain, code: u32) -> ErrorKind {
    use codes::*;

    match code {
        EXCEEDED_TIME_LIMIT => return ErrorKind::ExecutionTimeout,
        STREAM_SOCKET => return ErrorKind::ConnectionTimeout,
        DUPLICATE_KEY => return ErrorKind::DuplicateKey,
        CLIENT_AUTHENTICATE => return ErrorKind::AuthenticationFailed,

        STREAM_INVALID_TYPE
        | STREAM_INVALID_STATE
        | STREAM_NAME_RESOLUTION
        | STREAM_CONNECT
        | STREAM_NOT_ESTABLISHED => return ErrorKind::ConnectionFailed,

        CLIENT_NOT_READY
        | CLIENT_TOO_BIG
        | CLIENT_TOO_SMALL
        | CLIENT_GETNONCE
        | CLIENT_NO_ACCEPTABLE_PEER
        | CLIENT_IN_EXHAUST
        | PROTOCOL_INVALID_REPLY
        | PROTOCOL_BAD_WIRE_VERSION
        | CURSOR_INVALID_CURSOR
        | QUERY_FAILURE
        | BSON_INVALID
        | MATCHER_INVALID
        | NAMESPACE_INVALID
        | COMMAND_INVALID_ARG
        | COLLECTION_INSERT_FAILED
        | GRIDFS_INVALID_FILENAME
        | QUERY_COMMAND_NOT_FOUND
        | QUERY_NOT_TAILABLE => return ErrorKind::Runtime,

        _ => {}
    }

    match domain {
        ErrorDomain::Client
        | ErrorDomain::Stream
        | ErrorDomain::Protocol
        | ErrorDomain::Cursor
        | ErrorDomain::Query
        | ErrorDomain::Insert
        | ErrorDomain::Sasl
        | ErrorDomain::Bson
        | ErrorDomain::Matcher
        | ErrorDomain::Namespace
        | ErrorDomain::Command
        | ErrorDomain::Collection
        | ErrorDomain::Gridfs => ErrorKind::Runtime,
        ErrorDomain::Other(raw) => {
            error!("resolving unknown error domain {raw} (code {code})");
            ErrorKind::Runtime
        }
    }
}

#[cfg(test)]
mod tests {
    use super::codes::*;
    use super::*;

    const DOMAINS: [ErrorDomain; 14] = [
        ErrorDomain::Client,
        ErrorDomain::Stream,
        ErrorDomain::Protocol,
        ErrorDomain::Cursor,
        ErrorDomain::Query,
        ErrorDomain::Insert,
        ErrorDomain::Sasl,
        ErrorDomain::Bson,
        ErrorDomain::Matcher,
        ErrorDomain::Namespace,
        ErrorDomain::Command,
        ErrorDomain::Collection,
        ErrorDomain::Gridfs,
        ErrorDomain::Other(99),
    ];

    #[test]
    fn codes_take_precedence_over_domains() {
        let expected = [
            (EXCEEDED_TIME_LIMIT, ErrorKind::ExecutionTimeout),
            (STREAM_SOCKET, ErrorKind::ConnectionTimeout),
            (DUPLICATE_KEY, ErrorKind::DuplicateKey),
            (CLIENT_AUTHENTICATE, ErrorKind::AuthenticationFailed),
            (STREAM_INVALID_TYPE, ErrorKind::ConnectionFailed),
            (STREAM_INVALID_STATE, ErrorKind::ConnectionFailed),
            (STREAM_NAME_RESOLUTION, ErrorKind::ConnectionFailed),
            (STREAM_CONNECT, ErrorKind::ConnectionFailed),
            (STREAM_NOT_ESTABLISHED, ErrorKind::ConnectionFailed),
            (CLIENT_TOO_BIG, ErrorKind::Runtime),
            (PROTOCOL_INVALID_REPLY, ErrorKind::Runtime),
            (CURSOR_INVALID_CURSOR, ErrorKind::Runtime),
            (BSON_INVALID, ErrorKind::Runtime),
            (QUERY_NOT_TAILABLE, ErrorKind::Runtime),
        ];

        for domain in DOMAINS {
            for (code, kind) in expected {
                assert_eq!(classify(domain, code), kind, "{domain} / {code}");
            }
        }
    }

    #[test]
    fn classification_is_total() {
        let allowed = [
            ErrorKind::ExecutionTimeout,
            ErrorKind::ConnectionTimeout,
            ErrorKind::DuplicateKey,
            ErrorKind::AuthenticationFailed,
            ErrorKind::ConnectionFailed,
            ErrorKind::Runtime,
        ];

        for domain in DOMAINS {
            for code in (0..128).chain([11000, 11001, 13051, u32::MAX]) {
                assert!(allowed.contains(&classify(domain, code)));
            }
        }
    }

    #[test]
    fn unmapped_pairs_default_to_runtime() {
        assert_eq!(classify(ErrorDomain::Query, 121), ErrorKind::Runtime);
        assert_eq!(classify(ErrorDomain::Other(42), 9999), ErrorKind::Runtime);
    }
}
