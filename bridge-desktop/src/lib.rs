//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! - `HttpClient` using `reqwest`, with streaming bodies for audio downloads
//! - `StorageEstimator` that measures an on-disk data directory against an
//!   optional quota
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{DiskUsageEstimator, ReqwestHttpClient};
//!
//! #[tokio::main]
//! async fn main() {
//!     let http_client = ReqwestHttpClient::new();
//!     let estimator = DiskUsageEstimator::new();
//!
//!     // Use in core configuration
//! }
//! ```

mod disk;
mod http;

pub use disk::DiskUsageEstimator;
pub use http::ReqwestHttpClient;
