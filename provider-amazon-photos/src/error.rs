//! Error types for the Amazon Photos provider

use bridge_traits::error::BridgeError;
use thiserror::Error;

/// Amazon Photos provider errors
#[derive(Error, Debug)]
pub enum AmazonPhotosError {
    /// No usable session cookies
    #[error("No valid session: {0}")]
    SessionMissing(String),

    /// Session file could not be parsed
    #[error("Invalid session file: {0}")]
    SessionInvalid(String),

    /// API request returned a non-success status
    #[error("Amazon Photos API error (status {status_code}): {message}")]
    ApiError { status_code: u16, message: String },

    #[error("Node not found: {node_id}")]
    NodeNotFound { node_id: String },

    /// Failed to parse API response
    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    /// Network error
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for Amazon Photos operations
pub type Result<T> = std::result::Result<T, AmazonPhotosError>;

impl AmazonPhotosError {
    /// Classify a non-success HTTP status.
    pub fn from_status(status_code: u16, message: String, node_id: Option<&str>) -> Self {
        match (status_code, node_id) {
            (404, Some(id)) => AmazonPhotosError::NodeNotFound {
                node_id: id.to_string(),
            },
            (401 | 403, _) => AmazonPhotosError::SessionMissing(format!(
                "request rejected with status {}",
                status_code
            )),
            _ => AmazonPhotosError::ApiError {
                status_code,
                message,
            },
        }
    }
}

impl From<reqwest::Error> for AmazonPhotosError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            AmazonPhotosError::ParseError(error.to_string())
        } else {
            AmazonPhotosError::NetworkError(error.to_string())
        }
    }
}

impl From<AmazonPhotosError> for BridgeError {
    fn from(error: AmazonPhotosError) -> Self {
        match error {
            AmazonPhotosError::SessionMissing(msg) | AmazonPhotosError::SessionInvalid(msg) => {
                BridgeError::AuthExpired(msg)
            }
            AmazonPhotosError::NodeNotFound { node_id } => BridgeError::NotFound { remote_id: node_id },
            AmazonPhotosError::ApiError {
                status_code,
                message,
            } => match status_code {
                404 => BridgeError::NotFound { remote_id: message },
                408 | 429 | 500..=599 => {
                    BridgeError::Transient(format!("HTTP {}: {}", status_code, message))
                }
                _ => BridgeError::OperationFailed(format!(
                    "API error (status {}): {}",
                    status_code, message
                )),
            },
            AmazonPhotosError::NetworkError(msg) => BridgeError::Transient(msg),
            AmazonPhotosError::ParseError(msg) => {
                BridgeError::OperationFailed(format!("Parse error: {}", msg))
            }
            AmazonPhotosError::Io(e) => BridgeError::Io(e),
        }
    }
}
