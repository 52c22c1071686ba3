use crate::models::InvalidTransition;
use bridge_traits::error::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Corrupt record for {item_id}: {message}")]
    Corrupt { item_id: String, message: String },

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("Storage estimate unavailable: {0}")]
    Estimate(#[from] BridgeError),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
