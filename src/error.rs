//! Error types for edgewire.
//!
//! All errors in this crate are represented by [`Error`], which covers:
//! - I/O errors (network, stream close)
//! - TLS errors (handshake failure, certificate issues)
//! - Authentication errors (SCRAM mismatch, unsupported method)
//! - Protocol errors (malformed messages, unknown descriptors)
//! - Server errors (EdgeDB error responses, keyed by a u32 code)
//! - Client-side misuse (cardinality, arguments, state)

use thiserror::Error;

use crate::proto::Cardinality;

/// `TransactionConflictError` class prefix. Server errors in this class
/// (notably `TransactionSerializationError`, `0x0503_0101`) are safe to
/// retry inside a fresh transaction.
pub const TRANSACTION_CONFLICT_CLASS: u32 = 0x0503_0100;

/// `TransactionSerializationError` code.
pub const TRANSACTION_SERIALIZATION_ERROR: u32 = 0x0503_0101;

/// Error type for all edgewire operations.
#[derive(Debug, Error, Clone)]
pub enum Error {
    /// I/O error (network, stream close).
    ///
    /// Note: `std::io::Error` is not `Clone`, so we store the message.
    #[error("io error: {0}")]
    Io(String),

    /// TLS error - handshake failure, certificate validation, etc.
    #[error("tls error: {0}")]
    Tls(String),

    /// Authentication error - SCRAM mismatch or unsupported method.
    #[error("authentication error: {0}")]
    Auth(String),

    /// Protocol error - malformed message or unexpected response.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The connection's read loop terminated while operations were pending.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// Server error response, carrying the server's error code.
    #[error("server error {code:#010x}: {message}")]
    Server {
        severity: u8,
        code: u32,
        message: String,
        attributes: Vec<(u16, bytes::Bytes)>,
    },

    /// Result row count violates the cardinality the query declared.
    #[error("expected {expected:?} results, got {actual:?}")]
    CardinalityMismatch {
        expected: Cardinality,
        actual: Cardinality,
    },

    /// Query argument map does not match the input shape.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation is not valid in the current state (nested transaction,
    /// use after close).
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A step exceeded its deadline.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The server replied with a message the protocol state does not allow.
    #[error("unexpected message: expected {expected:#04x}, got {got:#04x}")]
    UnexpectedMessage { expected: u8, got: u8 },

    /// Restore refused because the target database already holds data.
    #[error("database is not empty")]
    DatabaseNotEmpty,
}

impl Error {
    /// Returns `true` if this is an I/O error.
    #[inline]
    pub fn is_io(&self) -> bool {
        matches!(self, Error::Io(_))
    }

    /// Returns `true` if this is a server error response.
    #[inline]
    pub fn is_server(&self) -> bool {
        matches!(self, Error::Server { .. })
    }

    /// Returns `true` if this is an authentication error.
    #[inline]
    pub fn is_auth(&self) -> bool {
        matches!(self, Error::Auth(_))
    }

    /// Returns `true` if this is a protocol error.
    #[inline]
    pub fn is_protocol(&self) -> bool {
        matches!(self, Error::Protocol(_))
    }

    /// Returns the server error code, if this is a server error.
    #[inline]
    pub fn server_code(&self) -> Option<u32> {
        match self {
            Error::Server { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Returns `true` if this error is likely transient: the connection
    /// died or timed out without the server rejecting anything.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::ConnectionLost(_) | Error::Timeout(_)
        )
    }

    /// Returns `true` if a transaction that failed with this error may be
    /// retried from the top: transient connection trouble, or a server
    /// error in the transaction-conflict class.
    pub fn is_retryable(&self) -> bool {
        if self.is_transient() {
            return true;
        }
        match self.server_code() {
            Some(code) => (code & 0xFFFF_FF00) == TRANSACTION_CONFLICT_CLASS,
            None => false,
        }
    }
}

// Manual From impl since io::Error isn't Clone
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

/// Result type alias for edgewire operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialization_errors_are_retryable() {
        let err = Error::Server {
            severity: 120,
            code: TRANSACTION_SERIALIZATION_ERROR,
            message: "could not serialize access".into(),
            attributes: Vec::new(),
        };
        assert!(err.is_retryable());
        assert!(!err.is_transient());
    }

    #[test]
    fn other_server_errors_are_not_retryable() {
        let err = Error::Server {
            severity: 120,
            code: 0x0400_0000, // QueryError class
            message: "syntax error".into(),
            attributes: Vec::new(),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn connection_loss_is_retryable() {
        assert!(Error::ConnectionLost("read loop exited".into()).is_retryable());
        assert!(Error::Io("broken pipe".into()).is_retryable());
        assert!(!Error::DatabaseNotEmpty.is_retryable());
    }
}
