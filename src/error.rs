//! Error taxonomy for the driver core.
//!
//! Every failed operation surfaces as exactly one [`Error`]. Failures reported by the
//! underlying driver arrive as a [`LowLevelError`] (a domain/code/message triple) and are
//! turned into an [`Error`] by the [classifier](crate::classify). Write failures carry the
//! [`WriteResult`] that describes the partial outcome so callers can inspect every
//! document-level failure, not only the first.
use std::fmt;

use thiserror::Error;

use crate::{classify, write_result::WriteResult};

/// Subsystem that produced a [`LowLevelError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorDomain {
    Client,
    Stream,
    Protocol,
    Cursor,
    Query,
    Insert,
    Sasl,
    Bson,
    Matcher,
    Namespace,
    Command,
    Collection,
    Gridfs,
    /// A domain this crate does not know about, reported by a foreign driver.
    Other(u32),
}

impl fmt::Display for ErrorDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorDomain::Client => write!(f, "client"),
            ErrorDomain::Stream => write!(f, "stream"),
            ErrorDomain::Protocol => write!(f, "protocol"),
            ErrorDomain::Cursor => write!(f, "cursor"),
            ErrorDomain::Query => write!(f, "query"),
            ErrorDomain::Insert => write!(f, "insert"),
            ErrorDomain::Sasl => write!(f, "sasl"),
            ErrorDomain::Bson => write!(f, "bson"),
            ErrorDomain::Matcher => write!(f, "matcher"),
            ErrorDomain::Namespace => write!(f, "namespace"),
            ErrorDomain::Command => write!(f, "command"),
            ErrorDomain::Collection => write!(f, "collection"),
            ErrorDomain::Gridfs => write!(f, "gridfs"),
            ErrorDomain::Other(raw) => write!(f, "domain({raw})"),
        }
    }
}

/// Failure record produced below the execution layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("[{domain}:{code}] {message}")]
pub struct LowLevelError {
    pub domain: ErrorDomain,
    pub code: u32,
    pub message: String,
}

impl LowLevelError {
    pub fn new(domain: ErrorDomain, code: u32, message: impl Into<String>) -> Self {
        Self {
            domain,
            code,
            message: message.into(),
        }
    }
}

/// Fieldless classification of an [`Error`], for branching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    Runtime,
    TransportFailed,
    WriteFailed,
    WriteErrorSingle,
    WriteConcernFailed,
    ConnectionFailed,
    SslConnectionFailed,
    ConnectionTimeout,
    AuthenticationFailed,
    DuplicateKey,
    ExecutionTimeout,
}

impl ErrorKind {
    pub fn is_connection(self) -> bool {
        matches!(
            self,
            ErrorKind::ConnectionFailed
                | ErrorKind::SslConnectionFailed
                | ErrorKind::ConnectionTimeout
        )
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("{message}")]
    Runtime { code: u32, message: String },

    /// The driver failed before anything reached the server.
    #[error("{0}")]
    TransportFailed(String),

    /// Batch-level failure; the write result lists every document-level error.
    #[error("BulkWrite error")]
    WriteFailed(Box<WriteResult>),

    #[error("{message}")]
    WriteErrorSingle {
        code: i32,
        message: String,
        write_result: Option<Box<WriteResult>>,
        /// Write-concern failure reported by the same operation.
        #[source]
        concern: Option<Box<Error>>,
    },

    #[error("{message}")]
    WriteConcernFailed {
        code: i32,
        message: String,
        write_result: Option<Box<WriteResult>>,
    },

    #[error("{message}")]
    ConnectionFailed { code: u32, message: String },

    #[error("{0}")]
    SslConnectionFailed(String),

    #[error("{message}")]
    ConnectionTimeout { code: u32, message: String },

    #[error("{message}")]
    AuthenticationFailed { code: u32, message: String },

    #[error("{message}")]
    DuplicateKey { code: u32, message: String },

    #[error("{message}")]
    ExecutionTimeout { code: u32, message: String },
}

impl Error {
    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        Error::InvalidArgument(message.into())
    }

    pub(crate) fn runtime(message: impl Into<String>) -> Self {
        Error::Runtime {
            code: 0,
            message: message.into(),
        }
    }

    /// A query or command whose cursor the driver could not create.
    pub(crate) fn cursor_creation(error: &LowLevelError) -> Self {
        Error::TransportFailed(format!("Couldn't create cursor: {}", error.message))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::Runtime { .. } => ErrorKind::Runtime,
            Error::TransportFailed(_) => ErrorKind::TransportFailed,
            Error::WriteFailed(_) => ErrorKind::WriteFailed,
            Error::WriteErrorSingle { .. } => ErrorKind::WriteErrorSingle,
            Error::WriteConcernFailed { .. } => ErrorKind::WriteConcernFailed,
            Error::ConnectionFailed { .. } => ErrorKind::ConnectionFailed,
            Error::SslConnectionFailed(_) => ErrorKind::SslConnectionFailed,
            Error::ConnectionTimeout { .. } => ErrorKind::ConnectionTimeout,
            Error::AuthenticationFailed { .. } => ErrorKind::AuthenticationFailed,
            Error::DuplicateKey { .. } => ErrorKind::DuplicateKey,
            Error::ExecutionTimeout { .. } => ErrorKind::ExecutionTimeout,
        }
    }

    /// Low-level or server error code, when the failure carries one.
    pub fn code(&self) -> Option<i64> {
        match self {
            Error::Runtime { code, .. }
            | Error::ConnectionFailed { code, .. }
            | Error::ConnectionTimeout { code, .. }
            | Error::AuthenticationFailed { code, .. }
            | Error::DuplicateKey { code, .. }
            | Error::ExecutionTimeout { code, .. } => Some(i64::from(*code)),
            Error::WriteErrorSingle { code, .. } | Error::WriteConcernFailed { code, .. } => {
                Some(i64::from(*code))
            }
            _ => None,
        }
    }

    pub fn write_result(&self) -> Option<&WriteResult> {
        match self {
            Error::WriteFailed(wr) => Some(wr),
            Error::WriteErrorSingle { write_result, .. }
            | Error::WriteConcernFailed { write_result, .. } => write_result.as_deref(),
            _ => None,
        }
    }

    /// Write-concern failure raised alongside a document-level write error.
    pub fn write_concern_error(&self) -> Option<&Error> {
        match self {
            Error::WriteErrorSingle { concern, .. } => concern.as_deref(),
            Error::WriteConcernFailed { .. } => Some(self),
            _ => None,
        }
    }

    /// Re-attaches a write result after a write failure was re-surfaced as a different kind.
    /// Errors outside the write family are returned unchanged.
    pub fn with_write_result(self, result: WriteResult) -> Self {
        match self {
            Error::WriteFailed(_) => Error::WriteFailed(Box::new(result)),
            Error::WriteErrorSingle {
                code,
                message,
                concern,
                ..
            } => Error::WriteErrorSingle {
                code,
                message,
                concern: concern.map(|c| Box::new(c.with_write_result(result.clone()))),
                write_result: Some(Box::new(result)),
            },
            Error::WriteConcernFailed { code, message, .. } => Error::WriteConcernFailed {
                code,
                message,
                write_result: Some(Box::new(result)),
            },
            other => other,
        }
    }
}

impl From<LowLevelError> for Error {
    fn from(error: LowLevelError) -> Self {
        let LowLevelError {
            domain,
            code,
            message,
        } = error;

        match classify::classify(domain, code) {
            ErrorKind::ExecutionTimeout => Error::ExecutionTimeout { code, message },
            ErrorKind::ConnectionTimeout => Error::ConnectionTimeout { code, message },
            ErrorKind::DuplicateKey => Error::DuplicateKey { code, message },
            ErrorKind::AuthenticationFailed => Error::AuthenticationFailed { code, message },
            ErrorKind::ConnectionFailed => Error::ConnectionFailed { code, message },
            _ => Error::Runtime { code, message },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use crate::classify::codes;

    use super::*;

    #[test]
    fn low_level_errors_are_classified_on_conversion() {
        let err: Error =
            LowLevelError::new(ErrorDomain::Query, codes::DUPLICATE_KEY, "E11000 dup").into();
        assert_eq!(err.kind(), ErrorKind::DuplicateKey);
        assert_eq!(err.code(), Some(11000));
        assert_eq!(err.to_string(), "E11000 dup");
    }

    #[test]
    fn stream_socket_errors_are_timeouts() {
        let err: Error =
            LowLevelError::new(ErrorDomain::Stream, codes::STREAM_SOCKET, "timed out").into();
        assert_eq!(err.kind(), ErrorKind::ConnectionTimeout);
        assert!(err.kind().is_connection());
    }

    #[test]
    fn write_concern_error_is_chained_as_source() {
        let concern = Error::WriteConcernFailed {
            code: 64,
            message: "waiting for replication timed out".into(),
            write_result: None,
        };
        let err = Error::WriteErrorSingle {
            code: 11000,
            message: "duplicate".into(),
            write_result: None,
            concern: Some(Box::new(concern)),
        };

        let source = err.source().unwrap();
        assert_eq!(source.to_string(), "waiting for replication timed out");
        assert_eq!(
            err.write_concern_error().map(Error::kind),
            Some(ErrorKind::WriteConcernFailed)
        );
    }

    #[test]
    fn non_write_errors_ignore_reattached_results() {
        let err = Error::invalid_argument("bad").with_write_result(WriteResult::default());
        assert!(err.write_result().is_none());
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn reattached_result_reaches_chained_concern() {
        let err = Error::WriteErrorSingle {
            code: 1,
            message: "x".into(),
            write_result: None,
            concern: Some(Box::new(Error::WriteConcernFailed {
                code: 2,
                message: "y".into(),
                write_result: None,
            })),
        }
        .with_write_result(WriteResult::default());

        assert!(err.write_result().is_some());
        assert!(err.write_concern_error().unwrap().write_result().is_some());
    }
}
