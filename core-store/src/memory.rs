//! In-memory [`OfflineStore`] guarded by a single lock.
//!
//! Used for ephemeral sessions and as the controllable store in tests: the
//! quota, the usage attributed to other data, and write failures can all be
//! set from outside.

use crate::error::{Result, StoreError};
use crate::models::{
    BlobInfo, CachedBlob, DownloadTask, ItemId, PlaybackProgress, StorageEstimate, TaskStatus,
};
use crate::repository::OfflineStore;
use async_trait::async_trait;
use bridge_traits::time::Clock;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
struct Inner {
    /// Task plus insertion sequence, used to break `created_at` ties.
    tasks: HashMap<ItemId, (u64, DownloadTask)>,
    blobs: HashMap<ItemId, (u64, CachedBlob)>,
    progress: HashMap<ItemId, PlaybackProgress>,
    next_seq: u64,
    external_usage: u64,
    quota: Option<u64>,
    task_writes: u64,
    fail_blob_writes: bool,
    fail_task_writes: Vec<TaskStatus>,
}

impl Inner {
    fn seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }
}

pub struct InMemoryStore {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
}

impl InMemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            clock,
        }
    }

    /// Report `quota` from [`OfflineStore::estimate`].
    pub fn with_quota(self, quota: u64) -> Self {
        self.inner.lock().quota = Some(quota);
        self
    }

    pub fn set_quota(&self, quota: Option<u64>) {
        self.inner.lock().quota = quota;
    }

    /// Bytes attributed to data outside this store (other caches, metadata).
    pub fn set_external_usage(&self, bytes: u64) {
        self.inner.lock().external_usage = bytes;
    }

    /// Make every subsequent `put_blob` fail.
    pub fn fail_blob_writes(&self, fail: bool) {
        self.inner.lock().fail_blob_writes = fail;
    }

    /// Make `put_task` fail for tasks in any of `statuses`. An empty slice
    /// lets every write through again.
    pub fn fail_task_writes(&self, statuses: &[TaskStatus]) {
        self.inner.lock().fail_task_writes = statuses.to_vec();
    }

    /// Number of `put_task` calls so far.
    pub fn task_writes(&self) -> u64 {
        self.inner.lock().task_writes
    }

    fn sorted_tasks<'a>(
        tasks: impl Iterator<Item = &'a (u64, DownloadTask)>,
    ) -> Vec<DownloadTask> {
        let mut tasks: Vec<_> = tasks.collect();
        tasks.sort_by_key(|(seq, task)| (task.created_at, *seq));
        tasks.into_iter().map(|(_, task)| task.clone()).collect()
    }
}

#[async_trait]
impl OfflineStore for InMemoryStore {
    async fn get_task(&self, item_id: &ItemId) -> Result<Option<DownloadTask>> {
        Ok(self.inner.lock().tasks.get(item_id).map(|(_, t)| t.clone()))
    }

    async fn put_task(&self, task: &DownloadTask) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.task_writes += 1;
        if inner.fail_task_writes.contains(&task.status) {
            return Err(StoreError::Unavailable(format!(
                "{} task write rejected for {}",
                task.status, task.item_id
            )));
        }
        let seq = match inner.tasks.get(&task.item_id) {
            Some((seq, _)) => *seq,
            None => inner.seq(),
        };
        inner
            .tasks
            .insert(task.item_id.clone(), (seq, task.clone()));
        Ok(())
    }

    async fn delete_task(&self, item_id: &ItemId) -> Result<bool> {
        Ok(self.inner.lock().tasks.remove(item_id).is_some())
    }

    async fn all_tasks(&self) -> Result<Vec<DownloadTask>> {
        let inner = self.inner.lock();
        Ok(Self::sorted_tasks(inner.tasks.values()))
    }

    async fn tasks_by_status(&self, status: TaskStatus) -> Result<Vec<DownloadTask>> {
        let inner = self.inner.lock();
        Ok(Self::sorted_tasks(
            inner.tasks.values().filter(|(_, t)| t.status == status),
        ))
    }

    async fn put_blob(&self, blob: &CachedBlob) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.fail_blob_writes {
            return Err(StoreError::Unavailable(format!(
                "blob write rejected for {}",
                blob.item_id
            )));
        }
        let seq = inner.seq();
        inner.blobs.insert(blob.item_id.clone(), (seq, blob.clone()));
        Ok(())
    }

    async fn read_blob(&self, item_id: &ItemId) -> Result<Option<CachedBlob>> {
        let now = self.clock.unix_timestamp_millis();
        let mut inner = self.inner.lock();
        Ok(inner.blobs.get_mut(item_id).map(|(_, blob)| {
            blob.last_accessed_at = now;
            blob.clone()
        }))
    }

    async fn has_blob(&self, item_id: &ItemId) -> Result<bool> {
        Ok(self.inner.lock().blobs.contains_key(item_id))
    }

    async fn blob_infos(&self) -> Result<Vec<BlobInfo>> {
        let inner = self.inner.lock();
        let mut blobs: Vec<_> = inner.blobs.values().collect();
        blobs.sort_by_key(|(seq, blob)| (blob.last_accessed_at, *seq));
        Ok(blobs.into_iter().map(|(_, blob)| blob.info()).collect())
    }

    async fn delete_blob(&self, item_id: &ItemId) -> Result<bool> {
        Ok(self.inner.lock().blobs.remove(item_id).is_some())
    }

    async fn evict(&self, item_ids: &[ItemId]) -> Result<u64> {
        let mut inner = self.inner.lock();
        let mut freed = 0u64;
        for item_id in item_ids {
            if let Some((_, blob)) = inner.blobs.remove(item_id) {
                freed = freed.saturating_add(blob.byte_size);
            }
            inner.tasks.remove(item_id);
        }
        Ok(freed)
    }

    async fn save_progress(&self, progress: &PlaybackProgress) -> Result<()> {
        self.inner
            .lock()
            .progress
            .insert(progress.item_id.clone(), progress.clone());
        Ok(())
    }

    async fn get_progress(&self, item_id: &ItemId) -> Result<Option<PlaybackProgress>> {
        Ok(self.inner.lock().progress.get(item_id).cloned())
    }

    async fn recent_progress(&self, limit: usize) -> Result<Vec<PlaybackProgress>> {
        let inner = self.inner.lock();
        let mut all: Vec<_> = inner.progress.values().cloned().collect();
        all.sort_by(|a, b| b.last_played_at.cmp(&a.last_played_at));
        all.truncate(limit);
        Ok(all)
    }

    async fn delete_progress(&self, item_id: &ItemId) -> Result<bool> {
        Ok(self.inner.lock().progress.remove(item_id).is_some())
    }

    async fn estimate(&self) -> Result<StorageEstimate> {
        let inner = self.inner.lock();
        let blob_bytes: u64 = inner.blobs.values().map(|(_, b)| b.byte_size).sum();
        Ok(StorageEstimate {
            usage_bytes: inner.external_usage.saturating_add(blob_bytes),
            quota_bytes: inner.quota,
        })
    }
}
