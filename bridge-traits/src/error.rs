use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Returns `true` when repeating the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            BridgeError::Timeout(_) | BridgeError::Io(_) => true,
            BridgeError::Http { status, .. } => *status >= 500 || *status == 429,
            BridgeError::OperationFailed(_) => true,
            BridgeError::NotAvailable(_) | BridgeError::InvalidUrl(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
