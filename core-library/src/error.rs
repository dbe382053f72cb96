use bridge_traits::error::BridgeError;
use core_metadata::MetadataError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Invalid input: {field} - {message}")]
    InvalidInput { field: String, message: String },

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Catalog is unreadable: {0}")]
    Catalog(String),
}

impl LibraryError {
    pub fn not_found(entity_type: &str, id: impl ToString) -> Self {
        LibraryError::NotFound {
            entity_type: entity_type.to_string(),
            id: id.to_string(),
        }
    }
}

impl From<MetadataError> for LibraryError {
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::UnsupportedFormat(message) => LibraryError::UnsupportedFormat(message),
            MetadataError::ExtractionFailed(message) => LibraryError::InvalidInput {
                field: "content".to_string(),
                message,
            },
        }
    }
}

impl From<serde_json::Error> for LibraryError {
    fn from(err: serde_json::Error) -> Self {
        LibraryError::Catalog(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LibraryError>;
