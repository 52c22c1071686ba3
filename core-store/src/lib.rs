//! # Offline Store
//!
//! Durable state for the offline subsystem: download tasks, cached audio
//! blobs and playback positions.
//!
//! ## Overview
//!
//! - [`OfflineStore`] is the storage contract the download manager and the
//!   playback cache are written against.
//! - [`SqliteOfflineStore`] persists to SQLite through `sqlx`, with embedded
//!   migrations and one transaction per eviction.
//! - [`InMemoryStore`] keeps everything behind a single lock; it backs
//!   ephemeral sessions and tests that need to steer quota and usage.

pub mod db;
pub mod error;
pub mod memory;
pub mod models;
pub mod repository;
pub mod sqlite;

pub use db::{create_pool, create_test_pool, DatabaseConfig};
pub use error::{Result, StoreError};
pub use memory::InMemoryStore;
pub use models::{
    BlobInfo, CachedBlob, DownloadTask, InvalidTransition, ItemId, PlaybackProgress,
    StorageEstimate, TaskStatus,
};
pub use repository::OfflineStore;
pub use sqlite::SqliteOfflineStore;
