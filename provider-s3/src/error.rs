//! Error types for the S3 provider

use bridge_traits::error::BridgeError;
use thiserror::Error;

/// S3 provider errors
#[derive(Error, Debug)]
pub enum S3Error {
    /// The service answered with an S3 error document
    #[error("S3 API error (status {status_code}, code {code}): {message}")]
    ApiError {
        status_code: u16,
        code: String,
        message: String,
    },

    /// Failed to parse or build an XML document
    #[error("Failed to parse S3 response: {0}")]
    ParseError(String),

    /// Bridge error
    #[error(transparent)]
    BridgeError(#[from] BridgeError),
}

/// Result type for S3 operations
pub type Result<T> = std::result::Result<T, S3Error>;

impl From<S3Error> for BridgeError {
    fn from(error: S3Error) -> Self {
        match error {
            S3Error::ApiError {
                status_code,
                code,
                message,
            } => match code.as_str() {
                "NoSuchBucket" | "NoSuchKey" | "NoSuchUpload" | "NoSuchVersion" => {
                    BridgeError::NotFound(format!("{code}: {message}"))
                }
                "BucketAlreadyExists" | "BucketAlreadyOwnedByYou" => {
                    BridgeError::AlreadyExists(format!("{code}: {message}"))
                }
                "BucketNotEmpty" => BridgeError::Conflict(format!("{code}: {message}")),
                "ObjectLocked" => BridgeError::ObjectLocked(message),
                "AccessDenied" if mentions_lock(&message) => BridgeError::ObjectLocked(message),
                "AccessDenied" | "InvalidAccessKeyId" | "SignatureDoesNotMatch"
                | "ExpiredToken" => BridgeError::PermissionDenied(format!("{code}: {message}")),
                "SlowDown" | "RequestTimeout" | "InternalError" | "ServiceUnavailable" => {
                    BridgeError::Http {
                        status: status_code.max(500),
                        message: format!("{code}: {message}"),
                    }
                }
                _ => BridgeError::from_status(status_code, format!("{code}: {message}")),
            },
            S3Error::ParseError(msg) => {
                BridgeError::OperationFailed(format!("Parse error: {}", msg))
            }
            S3Error::BridgeError(e) => e,
        }
    }
}

fn mentions_lock(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("object lock") || lower.contains("retention") || lower.contains("locked")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(status_code: u16, code: &str, message: &str) -> S3Error {
        S3Error::ApiError {
            status_code,
            code: code.to_string(),
            message: message.to_string(),
        }
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            api(404, "NoSuchKey", "The specified key does not exist.").to_string(),
            "S3 API error (status 404, code NoSuchKey): The specified key does not exist."
        );
    }

    #[test]
    fn test_error_conversion() {
        assert!(matches!(
            BridgeError::from(api(404, "NoSuchBucket", "gone")),
            BridgeError::NotFound(_)
        ));
        assert!(matches!(
            BridgeError::from(api(409, "BucketAlreadyOwnedByYou", "yours")),
            BridgeError::AlreadyExists(_)
        ));
        assert!(matches!(
            BridgeError::from(api(409, "BucketNotEmpty", "has objects")),
            BridgeError::Conflict(_)
        ));
        assert!(matches!(
            BridgeError::from(api(403, "AccessDenied", "Access Denied because object protected by object lock")),
            BridgeError::ObjectLocked(_)
        ));
        assert!(matches!(
            BridgeError::from(api(403, "AccessDenied", "Access Denied")),
            BridgeError::PermissionDenied(_)
        ));

        let throttled = BridgeError::from(api(503, "SlowDown", "reduce rate"));
        assert!(throttled.is_transient());
        let unknown = BridgeError::from(api(400, "InvalidArgument", "bad"));
        assert!(!unknown.is_transient());
    }
}
