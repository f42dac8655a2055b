//! Error types for interverse.

use std::time::Duration;

use thiserror::Error;

use crate::transport::RoomId;

/// Common error type for relay operations.
#[derive(Error, Debug)]
pub enum RelayError {
    /// The message was rejected by the safety filter.
    #[error("message rejected: {0}")]
    Filtered(String),

    /// The sender is being rate limited.
    #[error("rate limited, retry in {retry_after:?}")]
    RateLimited {
        /// Time until the sender may post again.
        retry_after: Duration,
    },

    /// Delivery to a single endpoint failed.
    ///
    /// This is always caught per endpoint and never fails a whole fan-out.
    #[error("delivery to room {room} failed: {cause}")]
    Delivery {
        /// The destination room.
        room: RoomId,
        /// Human-readable cause.
        cause: String,
    },

    /// A sink could not be looked up or created for a room.
    #[error("could not acquire a sink for room {room}: {cause}")]
    SinkAcquisition {
        /// The room the sink was requested for.
        room: RoomId,
        /// Human-readable cause.
        cause: String,
    },

    /// No broadcast record matched the given reference.
    #[error("message not found in history")]
    NotFoundInHistory,

    /// The caller is not allowed to perform the operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Transport collaborator error.
    #[error("transport error: {0}")]
    Transport(String),

    /// Shared federation-state store error.
    #[error("state store error: {0}")]
    Store(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filtered_display() {
        let err = RelayError::Filtered("too many mentions".to_string());
        assert_eq!(err.to_string(), "message rejected: too many mentions");
    }

    #[test]
    fn test_permission_denied_display() {
        let err = RelayError::PermissionDenied("moderator access required".to_string());
        assert_eq!(
            err.to_string(),
            "permission denied: moderator access required"
        );
    }

    #[test]
    fn test_delivery_display() {
        let err = RelayError::Delivery {
            room: RoomId(7),
            cause: "connection reset".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "delivery to room 7 failed: connection reset"
        );
    }

    #[test]
    fn test_not_found_display() {
        let err = RelayError::NotFoundInHistory;
        assert_eq!(err.to_string(), "message not found in history");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: RelayError = io_err.into();
        assert!(matches!(err, RelayError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_result_alias() {
        fn sample_ok() -> Result<i32> {
            Ok(42)
        }

        fn sample_err() -> Result<i32> {
            Err(RelayError::NotFoundInHistory)
        }

        assert_eq!(sample_ok().unwrap(), 42);
        assert!(sample_err().is_err());
    }
}
