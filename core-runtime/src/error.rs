use thiserror::Error;

/// Failures while assembling the runtime: configuration, host capabilities
/// and logging setup.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("{capability} is not available: {message}")]
    CapabilityMissing { capability: String, message: String },

    #[error("Host bridge failed: {0}")]
    Bridge(#[from] bridge_traits::BridgeError),
}

pub type Result<T> = std::result::Result<T, Error>;
