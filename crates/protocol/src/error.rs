//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering all payload decoding failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The payload ended before a field could be read.
    #[error("truncated payload: need {needed} bytes for {field}, have {available}")]
    Truncated {
        /// Name of the field being decoded.
        field: &'static str,
        /// Bytes required to decode the field.
        needed: usize,
        /// Bytes remaining in the payload.
        available: usize,
    },

    /// Bytes remained after the last field of a message.
    #[error("trailing data: {0} unexpected bytes after message")]
    TrailingData(usize),

    /// A string field was not valid UTF-8.
    #[error("invalid utf-8 in field {0}")]
    InvalidUtf8(&'static str),
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncated_error_display() {
        let err = ProtocolError::Truncated {
            field: "name",
            needed: 4,
            available: 2,
        };
        assert_eq!(
            err.to_string(),
            "truncated payload: need 4 bytes for name, have 2"
        );
    }

    #[test]
    fn test_trailing_data_error_display() {
        let err = ProtocolError::TrailingData(3);
        assert_eq!(
            err.to_string(),
            "trailing data: 3 unexpected bytes after message"
        );
    }

    #[test]
    fn test_invalid_utf8_error_display() {
        let err = ProtocolError::InvalidUtf8("command");
        assert_eq!(err.to_string(), "invalid utf-8 in field command");
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ProtocolError>();
    }
}
