use bridge_traits::error::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PeerError {
    /// Peer rejected the request
    #[error("Peer API error (status {status_code}): {message}")]
    ApiError { status_code: u16, message: String },

    /// Peer acknowledged a chunk at an offset that does not match what was sent
    #[error("Peer acknowledged offset {acknowledged}, expected {expected}")]
    OffsetMismatch { expected: u64, acknowledged: u64 },

    #[error(transparent)]
    BridgeError(#[from] BridgeError),
}

pub type Result<T> = std::result::Result<T, PeerError>;

impl From<PeerError> for BridgeError {
    fn from(error: PeerError) -> Self {
        match error {
            PeerError::ApiError {
                status_code,
                message,
            } => BridgeError::from_status(status_code, message),
            PeerError::OffsetMismatch { .. } => BridgeError::Conflict(error.to_string()),
            PeerError::BridgeError(inner) => inner,
        }
    }
}
