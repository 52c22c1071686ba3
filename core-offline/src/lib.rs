//! # Offline Download & Cache
//!
//! Keeps archive audio available without a network connection.
//!
//! ## Overview
//!
//! - [`DownloadQueueManager`]: bounded concurrent download queue with
//!   pause, resume, retry and cancel, backed by a persistent store
//! - [`eviction::select_for_eviction`]: least-recently-used selection used
//!   to stay inside the storage budget
//! - [`HttpFetcher`]: streaming transfer with progress and cooperative
//!   cancellation
//! - [`PlaybackCache`]: what the playback engine talks to: cached bytes
//!   and saved positions
//!
//! Downloads always restart from byte zero; partial transfers are never
//! resumed.

pub mod budget;
pub mod config;
pub mod error;
pub mod eviction;
pub mod fetcher;
pub mod manager;
pub mod playback;
pub mod throttle;

pub use budget::{StorageBudget, StorageStats};
pub use config::OfflineConfig;
pub use error::{OfflineError, Result};
pub use fetcher::{FetchError, FetchedPayload, HttpFetcher, ProgressReporter, RemoteFetcher};
pub use manager::{DownloadQueueManager, EnqueueOutcome, OfflineItem, RecoveryReport};
pub use playback::PlaybackCache;
