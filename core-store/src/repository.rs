//! # Offline Store Contract
//!
//! Durable storage for download tasks, cached blobs and playback positions.
//!
//! Two guarantees matter to callers:
//! - [`OfflineStore::read_blob`] refreshes the blob's recency timestamp, so
//!   eviction order follows actual playback.
//! - [`OfflineStore::evict`] removes every listed blob together with its task
//!   in one atomic step; readers never observe a task without its blob or the
//!   reverse.

use crate::error::Result;
use crate::models::{
    BlobInfo, CachedBlob, DownloadTask, ItemId, PlaybackProgress, StorageEstimate, TaskStatus,
};
use async_trait::async_trait;

#[async_trait]
pub trait OfflineStore: Send + Sync {
    // ---- tasks -------------------------------------------------------------

    async fn get_task(&self, item_id: &ItemId) -> Result<Option<DownloadTask>>;

    /// Insert or replace the task for `task.item_id`.
    async fn put_task(&self, task: &DownloadTask) -> Result<()>;

    /// Returns `true` if a task was removed.
    async fn delete_task(&self, item_id: &ItemId) -> Result<bool>;

    /// Every task, oldest first.
    async fn all_tasks(&self) -> Result<Vec<DownloadTask>>;

    /// Tasks in one status, oldest `created_at` first.
    async fn tasks_by_status(&self, status: TaskStatus) -> Result<Vec<DownloadTask>>;

    // ---- blobs -------------------------------------------------------------

    /// Insert or replace a blob.
    async fn put_blob(&self, blob: &CachedBlob) -> Result<()>;

    /// Fetch a blob and mark it as just accessed.
    async fn read_blob(&self, item_id: &ItemId) -> Result<Option<CachedBlob>>;

    /// Existence check that leaves recency untouched.
    async fn has_blob(&self, item_id: &ItemId) -> Result<bool>;

    /// Metadata for every blob, without payloads.
    async fn blob_infos(&self) -> Result<Vec<BlobInfo>>;

    /// Returns `true` if a blob was removed.
    async fn delete_blob(&self, item_id: &ItemId) -> Result<bool>;

    /// Atomically delete the blobs and tasks of `item_ids`. Returns the bytes
    /// freed. Unknown ids are skipped.
    async fn evict(&self, item_ids: &[ItemId]) -> Result<u64>;

    // ---- playback progress ---------------------------------------------------

    async fn save_progress(&self, progress: &PlaybackProgress) -> Result<()>;

    async fn get_progress(&self, item_id: &ItemId) -> Result<Option<PlaybackProgress>>;

    /// Most recently played first.
    async fn recent_progress(&self, limit: usize) -> Result<Vec<PlaybackProgress>>;

    async fn delete_progress(&self, item_id: &ItemId) -> Result<bool>;

    // ---- accounting ----------------------------------------------------------

    /// Current usage and, when the host reports one, its quota.
    async fn estimate(&self) -> Result<StorageEstimate>;
}
