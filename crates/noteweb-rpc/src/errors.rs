//! RPC error codes and error types.

use std::time::Duration;

use noteweb_vault::StoreError;
use serde_json::Value;

// ── Error code constants ────────────────────────────────────────────

/// Method not found in the registry.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Any handler failure.
pub const APPLICATION_ERROR: i64 = -32000;

/// Error returned by a method handler.
///
/// Every variant goes on the wire as [`APPLICATION_ERROR`] with the display
/// text as the message; the variant picks the metrics label.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// Params missing, mistyped or semantically invalid.
    #[error("{message}")]
    BadRequest {
        /// Description of what is wrong.
        message: String,
    },

    /// Requested note or path does not exist.
    #[error("{message}")]
    NotFound {
        /// Human-readable message.
        message: String,
    },

    /// Target already exists.
    #[error("{message}")]
    AlreadyExists {
        /// Human-readable message.
        message: String,
    },

    /// Target collides with an entry of the wrong kind.
    #[error("{message}")]
    Conflict {
        /// Human-readable message.
        message: String,
    },

    /// Unexpected failure (I/O, panic, timeout).
    #[error("{message}")]
    Internal {
        /// Description.
        message: String,
    },
}

impl RpcError {
    /// Wire error code.
    pub fn code(&self) -> i64 {
        APPLICATION_ERROR
    }

    /// Short machine-readable kind, used as a metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => "bad_request",
            Self::NotFound { .. } => "not_found",
            Self::AlreadyExists { .. } => "already_exists",
            Self::Conflict { .. } => "conflict",
            Self::Internal { .. } => "internal",
        }
    }
}

impl From<StoreError> for RpcError {
    fn from(err: StoreError) -> Self {
        let message = err.to_string();
        match err {
            StoreError::InvalidPath(_) => Self::BadRequest { message },
            StoreError::NotFound(_) => Self::NotFound { message },
            StoreError::AlreadyExists(_) => Self::AlreadyExists { message },
            StoreError::NotAFolder(_) => Self::Conflict { message },
            StoreError::Io { .. } => Self::Internal { message },
        }
    }
}

/// Failure of an outbound call made with
/// [`RpcPeer::call_remote`](crate::peer::RpcPeer::call_remote).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CallError {
    /// The remote answered with an error response.
    #[error("remote error {code}: {message}")]
    Remote {
        /// Remote error code.
        code: i64,
        /// Remote error message.
        message: String,
        /// Remote error data.
        data: Option<Value>,
    },

    /// The connection was drained before an answer arrived.
    #[error("connection closed ({code}): {reason}")]
    ConnectionClosed {
        /// WebSocket close code.
        code: u16,
        /// Close reason.
        reason: String,
    },

    /// The outbound queue refused the frame.
    #[error("failed to queue outbound message")]
    SendFailed,

    /// No answer within the caller-supplied deadline.
    #[error("call timed out after {0:?}")]
    Timeout(Duration),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_variants_share_application_code() {
        let errors = [
            RpcError::BadRequest { message: "a".into() },
            RpcError::NotFound { message: "b".into() },
            RpcError::AlreadyExists { message: "c".into() },
            RpcError::Conflict { message: "d".into() },
            RpcError::Internal { message: "e".into() },
        ];
        for err in &errors {
            assert_eq!(err.code(), APPLICATION_ERROR);
        }
        assert_eq!(errors[0].to_string(), "a");
        assert_eq!(errors[3].kind(), "conflict");
    }

    #[test]
    fn store_errors_map_to_kinds() {
        let cases = [
            (StoreError::InvalidPath("x".into()), "bad_request"),
            (StoreError::NotFound("x".into()), "not_found"),
            (StoreError::AlreadyExists("x".into()), "already_exists"),
            (StoreError::NotAFolder("x".into()), "conflict"),
            (
                StoreError::Io {
                    path: "x".into(),
                    source: std::io::Error::other("disk"),
                },
                "internal",
            ),
        ];
        for (store_err, kind) in cases {
            assert_eq!(RpcError::from(store_err).kind(), kind);
        }
    }

    #[test]
    fn store_error_message_survives() {
        let err = RpcError::from(StoreError::AlreadyExists("a/b.md".into()));
        assert!(err.to_string().contains("a/b.md"));
    }

    #[test]
    fn call_error_messages() {
        let closed = CallError::ConnectionClosed {
            code: 1001,
            reason: "server stopping".into(),
        };
        assert_eq!(closed.to_string(), "connection closed (1001): server stopping");
        let remote = CallError::Remote {
            code: -32601,
            message: "nope".into(),
            data: None,
        };
        assert!(remote.to_string().contains("-32601"));
    }
}
