use crate::fetcher::FetchError;
use core_store::{InvalidTransition, StoreError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OfflineError {
    #[error("Not enough storage: need {needed} bytes, {available} available")]
    StorageExhausted { needed: u64, available: u64 },

    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    #[error("Transfer cancelled")]
    TransferCancelled,

    #[error("No download task for {0}")]
    NotFound(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),

    #[error("Invalid state for {item_id}: {message}")]
    InvalidState { item_id: String, message: String },

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl OfflineError {
    pub(crate) fn invalid_state(item_id: impl ToString, message: impl Into<String>) -> Self {
        OfflineError::InvalidState {
            item_id: item_id.to_string(),
            message: message.into(),
        }
    }
}

/// How a transfer outcome reads once it leaves the fetcher; the message
/// becomes the task's `last_error`.
impl From<FetchError> for OfflineError {
    fn from(error: FetchError) -> Self {
        match error {
            FetchError::Cancelled => OfflineError::TransferCancelled,
            other => OfflineError::TransferFailed(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, OfflineError>;
