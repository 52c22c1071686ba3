//! Error types for the archive provider

use bridge_traits::error::BridgeError;
use thiserror::Error;

/// Archive provider errors
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// API request returned an error status
    #[error("Archive API error (status {status_code}): {message}")]
    ApiError { status_code: u16, message: String },

    /// Item does not exist or has no files
    #[error("Item not found: {item_id}")]
    ItemNotFound { item_id: String },

    /// Failed to parse API response
    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    /// Rejected before any request was made
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Bridge error
    #[error(transparent)]
    BridgeError(#[from] BridgeError),
}

/// Result type for archive operations
pub type Result<T> = std::result::Result<T, ArchiveError>;

impl ArchiveError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ArchiveError::ItemNotFound { .. } | ArchiveError::ApiError { status_code: 404, .. }
        )
    }
}

impl From<ArchiveError> for BridgeError {
    fn from(error: ArchiveError) -> Self {
        match error {
            ArchiveError::ApiError {
                status_code,
                message,
            } => BridgeError::Http {
                status: status_code,
                message,
            },
            ArchiveError::ItemNotFound { item_id } => BridgeError::Http {
                status: 404,
                message: format!("Item not found: {}", item_id),
            },
            ArchiveError::ParseError(msg) => {
                BridgeError::OperationFailed(format!("Parse error: {}", msg))
            }
            ArchiveError::InvalidConfig(msg) => BridgeError::InvalidUrl(msg),
            ArchiveError::BridgeError(e) => e,
        }
    }
}
