use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Object is locked: {0}")]
    ObjectLocked(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            BridgeError::Timeout(_) | BridgeError::ConnectionLost(_) => true,
            BridgeError::Http { status, .. } => {
                *status == 408 || *status == 429 || (500..600).contains(status)
            }
            BridgeError::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }

    /// Build an error from a non-success HTTP status, picking the most specific variant.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => BridgeError::PermissionDenied(message),
            404 => BridgeError::NotFound(message),
            409 => BridgeError::Conflict(message),
            _ => BridgeError::Http { status, message },
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(BridgeError::Timeout("slow".into()).is_transient());
        assert!(BridgeError::ConnectionLost("reset".into()).is_transient());
        assert!(BridgeError::Http {
            status: 503,
            message: "unavailable".into()
        }
        .is_transient());
        assert!(BridgeError::Http {
            status: 429,
            message: "slow down".into()
        }
        .is_transient());

        assert!(!BridgeError::PermissionDenied("nope".into()).is_transient());
        assert!(!BridgeError::ObjectLocked("key".into()).is_transient());
        assert!(!BridgeError::Http {
            status: 400,
            message: "bad".into()
        }
        .is_transient());
    }

    #[test]
    fn test_from_status() {
        assert!(matches!(
            BridgeError::from_status(403, "denied"),
            BridgeError::PermissionDenied(_)
        ));
        assert!(matches!(
            BridgeError::from_status(404, "gone"),
            BridgeError::NotFound(_)
        ));
        assert!(matches!(
            BridgeError::from_status(502, "gateway"),
            BridgeError::Http { status: 502, .. }
        ));
    }
}
