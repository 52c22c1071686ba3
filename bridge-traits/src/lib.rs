//! # Host Bridge Traits
//!
//! Capability contracts the offline audio core requires from its host.
//!
//! ## Overview
//!
//! The core never talks to the network, the clock or the host's storage
//! accounting directly. Each of those is a trait defined here and injected at
//! construction time, so desktop builds, browser builds and tests can each
//! supply their own adapter.
//!
//! ## Traits
//!
//! - [`HttpClient`](http::HttpClient) - Buffered requests and streaming downloads
//! - [`StorageEstimator`](storage::StorageEstimator) - Host quota/usage estimate
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Error Handling
//!
//! All bridge traits report failures through [`BridgeError`](error::BridgeError).
//! Implementations should convert platform errors and keep messages actionable
//! (include the URL or path involved).
//!
//! ## Thread Safety
//!
//! Every trait requires `Send + Sync`; adapters are shared across tasks behind
//! `Arc`.

pub mod error;
pub mod http;
pub mod storage;
pub mod time;

pub use error::BridgeError;

pub use http::{ByteStream, HttpClient, HttpMethod, HttpRequest, HttpResponse, HttpStream, RetryPolicy};
pub use storage::{HostStorageEstimate, StorageEstimator, UnknownStorageEstimator};
pub use time::{Clock, ConsoleLogger, LogEntry, LogLevel, LoggerSink, ManualClock, SystemClock};
