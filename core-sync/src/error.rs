use bridge_traits::error::BridgeError;
use core_library::LibraryError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("{entity_type} not found: {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("An instance is already registered at {base_url}")]
    AlreadyRegistered { base_url: String },

    #[error("Replication already in progress for {}", target_keys.join(", "))]
    AlreadyInProgress { target_keys: Vec<String> },

    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("Invalid input: {field} - {message}")]
    InvalidInput { field: String, message: String },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Network timeout: {0}")]
    NetworkTimeout(String),

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Object is under retention: {0}")]
    ObjectLocked(String),

    #[error("Not empty: {0}")]
    NotEmpty(String),

    #[error("Replication cancelled")]
    Cancelled,

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Library error: {0}")]
    Library(String),
}

impl SyncError {
    pub fn not_found(entity_type: &str, id: impl ToString) -> Self {
        SyncError::NotFound {
            entity_type: entity_type.to_string(),
            id: id.to_string(),
        }
    }

    pub fn invalid_input(field: &str, message: impl Into<String>) -> Self {
        SyncError::InvalidInput {
            field: field.to_string(),
            message: message.into(),
        }
    }

    /// Whether the orchestrator should back off and try the target again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::NetworkTimeout(_) | SyncError::Transient(_))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            SyncError::NotFound { .. } => ErrorKind::NotFound,
            SyncError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            SyncError::AlreadyRegistered { .. } => ErrorKind::AlreadyRegistered,
            SyncError::AlreadyInProgress { .. } => ErrorKind::AlreadyInProgress,
            SyncError::InvalidUrl { .. } => ErrorKind::InvalidUrl,
            SyncError::InvalidName { .. } => ErrorKind::InvalidName,
            SyncError::InvalidInput { .. } => ErrorKind::InvalidInput,
            SyncError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            SyncError::NetworkTimeout(_) => ErrorKind::NetworkTimeout,
            SyncError::Transient(_) => ErrorKind::Transient,
            SyncError::ObjectLocked(_) => ErrorKind::ObjectLocked,
            SyncError::NotEmpty(_) => ErrorKind::NotEmpty,
            SyncError::Cancelled => ErrorKind::Cancelled,
            SyncError::InvalidStateTransition { .. } => ErrorKind::InvalidStateTransition,
            SyncError::Backend(_) | SyncError::Database(_) | SyncError::Library(_) => {
                ErrorKind::Internal
            }
        }
    }
}

/// Stable error classification carried in job summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnsupportedFormat,
    NotFound,
    AlreadyExists,
    AlreadyRegistered,
    AlreadyInProgress,
    InvalidUrl,
    InvalidName,
    InvalidInput,
    PermissionDenied,
    NetworkTimeout,
    Transient,
    ObjectLocked,
    NotEmpty,
    Cancelled,
    InvalidStateTransition,
    Internal,
}

impl From<BridgeError> for SyncError {
    fn from(err: BridgeError) -> Self {
        let transient = err.is_transient();
        match err {
            BridgeError::NotFound(what) => SyncError::not_found("resource", what),
            BridgeError::AlreadyExists(what) => SyncError::AlreadyExists(what),
            BridgeError::PermissionDenied(message) => SyncError::PermissionDenied(message),
            BridgeError::Timeout(message) => SyncError::NetworkTimeout(message),
            BridgeError::ConnectionLost(message) => SyncError::Transient(message),
            BridgeError::ObjectLocked(message) => SyncError::ObjectLocked(message),
            BridgeError::Cancelled => SyncError::Cancelled,
            BridgeError::Http { status, message } if transient => {
                SyncError::Transient(format!("HTTP {status}: {message}"))
            }
            BridgeError::Http { status, message } => {
                SyncError::Backend(format!("HTTP {status}: {message}"))
            }
            BridgeError::Io(io) if transient => SyncError::Transient(io.to_string()),
            BridgeError::Io(io) if io.kind() == std::io::ErrorKind::PermissionDenied => {
                SyncError::PermissionDenied(io.to_string())
            }
            other => SyncError::Backend(other.to_string()),
        }
    }
}

impl From<LibraryError> for SyncError {
    fn from(err: LibraryError) -> Self {
        match err {
            LibraryError::Bridge(bridge) => bridge.into(),
            LibraryError::NotFound { entity_type, id } => SyncError::NotFound { entity_type, id },
            LibraryError::InvalidInput { field, message } => {
                SyncError::InvalidInput { field, message }
            }
            LibraryError::UnsupportedFormat(message) => SyncError::UnsupportedFormat(message),
            LibraryError::Catalog(message) => SyncError::Library(message),
        }
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        SyncError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Backend(format!("JSON encoding failed: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_error_classification() {
        let err: SyncError = BridgeError::Timeout("peer".into()).into();
        assert!(err.is_retryable());
        assert_eq!(err.kind(), ErrorKind::NetworkTimeout);

        let err: SyncError = BridgeError::Http {
            status: 503,
            message: "busy".into(),
        }
        .into();
        assert!(matches!(err, SyncError::Transient(_)));

        let err: SyncError = BridgeError::Http {
            status: 400,
            message: "bad".into(),
        }
        .into();
        assert!(!err.is_retryable());

        let err: SyncError = BridgeError::PermissionDenied("home".into()).into();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        assert!(!err.is_retryable());

        let err: SyncError = BridgeError::ObjectLocked("k".into()).into();
        assert_eq!(err.kind(), ErrorKind::ObjectLocked);
    }

    #[test]
    fn test_io_permission_denied_is_terminal() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let err: SyncError = BridgeError::Io(io).into();
        assert!(matches!(err, SyncError::PermissionDenied(_)));
    }

    #[test]
    fn test_library_not_found_keeps_entity() {
        let err: SyncError = LibraryError::not_found("file", "abc").into();
        match err {
            SyncError::NotFound { entity_type, id } => {
                assert_eq!(entity_type, "file");
                assert_eq!(id, "abc");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_in_progress_message_lists_keys() {
        let err = SyncError::AlreadyInProgress {
            target_keys: vec!["user:ana".into(), "bucket:b1".into()],
        };
        assert_eq!(
            err.to_string(),
            "Replication already in progress for user:ana, bucket:b1"
        );
    }
}
