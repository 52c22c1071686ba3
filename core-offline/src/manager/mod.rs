//! # Download Queue Manager
//!
//! Admits, schedules and tracks offline downloads under a concurrency cap
//! and a storage budget.
//!
//! ## Lifecycle
//!
//! ```text
//! enqueue ──> pending ──process_queue──> downloading ──> completed
//!               ^  │                        │  │
//!        resume │  └──pause──> paused <─────┘  └──> failed
//!               └──────────────┘    retry ──> pending
//! ```
//!
//! ## Concurrency
//!
//! One async mutex guards the set of active transfers, and every
//! read-modify-write of a persisted task happens while holding it. A task is
//! marked `downloading` and registered as active in the same critical
//! section, and leaves the active set only in the critical section that
//! records its outcome, so the number of `downloading` tasks never exceeds
//! `max_concurrent_downloads`.
//!
//! Pausing or cancelling only signals the transfer's [`CancellationToken`];
//! the slot is released once the fetcher observes it.
//!
//! The storage admission check is advisory: nothing is reserved between the
//! check and the eventual write, so concurrent enqueues may over-commit by a
//! bounded amount.

mod worker;

use crate::budget::{StorageBudget, StorageStats};
use crate::config::OfflineConfig;
use crate::error::{OfflineError, Result};
use crate::eviction::select_for_eviction;
use crate::fetcher::{FetchError, FetchedPayload, RemoteFetcher};
use bridge_traits::time::Clock;
use bytes::Bytes;
use core_async::sync::{CancellationToken, Mutex};
use core_runtime::events::{CacheEvent, CoreEvent, DownloadEvent, EventBus, EventStream};
use core_store::{CachedBlob, DownloadTask, ItemId, OfflineStore, TaskStatus};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// What the caller wants available offline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfflineItem {
    pub item_id: ItemId,
    pub source_url: Option<String>,
    pub file_name: Option<String>,
    /// Declared payload size in bytes; 0 when unknown
    pub declared_size: u64,
}

impl OfflineItem {
    pub fn new(item_id: impl Into<ItemId>, source_url: impl Into<String>, declared_size: u64) -> Self {
        Self {
            item_id: item_id.into(),
            source_url: Some(source_url.into()),
            file_name: None,
            declared_size,
        }
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }
}

/// Result of a successful [`DownloadQueueManager::enqueue`].
#[derive(Debug, Clone)]
pub struct EnqueueOutcome {
    /// The task as persisted after promotion ran
    pub task: DownloadTask,
    /// Items evicted to make room, least recently used first
    pub evicted: Vec<ItemId>,
}

/// Repairs applied by [`DownloadQueueManager::recover`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Interrupted transfers put back to `pending`
    pub requeued: Vec<ItemId>,
    /// `completed` tasks dropped because their blob was missing
    pub repaired: Vec<ItemId>,
}

#[derive(Default)]
struct QueueState {
    active: HashMap<ItemId, CancellationToken>,
    /// Tasks whose transfer ended but whose outcome could not be persisted.
    /// They stay `downloading` in the store until marked failed here.
    orphaned: HashMap<ItemId, String>,
}

struct Shared {
    config: OfflineConfig,
    store: Arc<dyn OfflineStore>,
    fetcher: Arc<dyn RemoteFetcher>,
    events: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    state: Mutex<QueueState>,
}

/// Bounded, persistent download queue.
///
/// Cloning is cheap; clones share one queue.
///
/// # Example
///
/// ```rust,ignore
/// use core_offline::{DownloadQueueManager, OfflineConfig, OfflineItem};
///
/// let manager = DownloadQueueManager::new(config, store, fetcher, events, clock)?;
/// manager.initialize().await?;
///
/// let outcome = manager
///     .enqueue(OfflineItem::new("lecture-01", url, 15_000_000))
///     .await?;
/// for evicted in &outcome.evicted {
///     println!("made room by removing {evicted}");
/// }
/// ```
#[derive(Clone)]
pub struct DownloadQueueManager {
    shared: Arc<Shared>,
}

impl DownloadQueueManager {
    /// # Errors
    ///
    /// Returns [`OfflineError::Config`] if `config` does not validate.
    pub fn new(
        config: OfflineConfig,
        store: Arc<dyn OfflineStore>,
        fetcher: Arc<dyn RemoteFetcher>,
        events: Arc<EventBus>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate().map_err(OfflineError::Config)?;

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                store,
                fetcher,
                events,
                clock,
                state: Mutex::new(QueueState::default()),
            }),
        })
    }

    pub fn config(&self) -> &OfflineConfig {
        &self.shared.config
    }

    fn now(&self) -> i64 {
        self.shared.clock.unix_timestamp_millis()
    }

    fn emit(&self, event: CoreEvent) {
        self.shared.events.emit(event).ok();
    }

    fn emit_status(&self, item_id: &ItemId, from: TaskStatus, to: TaskStatus) {
        if from != to {
            self.emit(CoreEvent::Download(DownloadEvent::StatusChanged {
                item_id: item_id.to_string(),
                from: from.to_string(),
                to: to.to_string(),
            }));
        }
    }

    // ------------------------------------------------------------------------
    // Startup
    // ------------------------------------------------------------------------

    /// Repair state left behind by an unclean shutdown.
    ///
    /// `downloading` tasks go back to `pending` with zero progress, and
    /// `completed` tasks whose blob is gone are dropped. Nothing is promoted.
    #[instrument(skip(self))]
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let mut state = self.shared.state.lock().await;
        let store = &self.shared.store;
        let mut report = RecoveryReport::default();

        for task in store.tasks_by_status(TaskStatus::Downloading).await? {
            if state.active.contains_key(&task.item_id) {
                continue;
            }
            let item_id = task.item_id.clone();
            let task = task.requeue(self.now())?;
            store.put_task(&task).await?;
            state.orphaned.remove(&item_id);
            self.emit_status(&item_id, TaskStatus::Downloading, TaskStatus::Pending);
            report.requeued.push(item_id);
        }

        for task in store.tasks_by_status(TaskStatus::Completed).await? {
            if !store.has_blob(&task.item_id).await? {
                warn!(item_id = %task.item_id, "Completed task has no cached payload, dropping it");
                store.delete_task(&task.item_id).await?;
                report.repaired.push(task.item_id);
            }
        }

        if !report.requeued.is_empty() || !report.repaired.is_empty() {
            info!(
                requeued = report.requeued.len(),
                repaired = report.repaired.len(),
                "Recovered download queue"
            );
        }
        Ok(report)
    }

    /// [`recover`](Self::recover), then start pending transfers.
    pub async fn initialize(&self) -> Result<RecoveryReport> {
        let report = self.recover().await?;
        self.process_queue().await?;
        Ok(report)
    }

    // ------------------------------------------------------------------------
    // Queue operations
    // ------------------------------------------------------------------------

    /// Queue `item` for download, evicting least recently used items if the
    /// storage budget requires it.
    ///
    /// Re-enqueueing a `paused` or `failed` item requeues it from byte zero;
    /// an item that is already `pending` is returned unchanged.
    ///
    /// # Errors
    ///
    /// - [`OfflineError::InvalidState`] if the item is `completed` or
    ///   `downloading`.
    /// - [`OfflineError::StorageExhausted`] if eviction cannot free enough
    ///   room. Items evicted in the attempt stay evicted.
    #[instrument(skip(self, item), fields(item_id = %item.item_id, size = item.declared_size))]
    pub async fn enqueue(&self, item: OfflineItem) -> Result<EnqueueOutcome> {
        {
            let mut state = self.shared.state.lock().await;
            self.settle_orphans(&mut state).await;
        }

        if let Some(existing) = self.shared.store.get_task(&item.item_id).await? {
            if Self::check_enqueueable(&existing)? {
                return Ok(EnqueueOutcome {
                    task: existing,
                    evicted: Vec::new(),
                });
            }
        }

        let evicted = self.ensure_headroom(item.declared_size).await?;

        let task = {
            let _state = self.shared.state.lock().await;
            let now = self.now();

            let task = match self.shared.store.get_task(&item.item_id).await? {
                None => DownloadTask::new(
                    item.item_id.clone(),
                    item.source_url.clone(),
                    item.file_name.clone(),
                    Some(item.declared_size),
                    now,
                ),
                Some(existing) => {
                    if Self::check_enqueueable(&existing)? {
                        return Ok(EnqueueOutcome {
                            task: existing,
                            evicted,
                        });
                    }
                    let from = existing.status;
                    let mut task = existing.requeue(now)?;
                    if item.source_url.is_some() {
                        task.source_url = item.source_url.clone();
                    }
                    if item.file_name.is_some() {
                        task.file_name = item.file_name.clone();
                    }
                    if item.declared_size > 0 {
                        task.total_bytes = Some(item.declared_size);
                    }
                    self.emit_status(&task.item_id, from, TaskStatus::Pending);
                    task
                }
            };

            self.shared.store.put_task(&task).await?;
            self.emit(CoreEvent::Download(DownloadEvent::Queued {
                item_id: task.item_id.to_string(),
                total_bytes: task.total_bytes,
            }));
            task
        };

        info!(evicted = evicted.len(), "Download queued");
        self.kick().await;

        let task = self
            .shared
            .store
            .get_task(&task.item_id)
            .await?
            .unwrap_or(task);
        Ok(EnqueueOutcome { task, evicted })
    }

    /// `Ok(true)` when the task is already pending, `Ok(false)` when it may be
    /// (re)queued.
    fn check_enqueueable(task: &DownloadTask) -> Result<bool> {
        match task.status {
            TaskStatus::Completed => Err(OfflineError::invalid_state(
                &task.item_id,
                "already available offline",
            )),
            TaskStatus::Downloading => Err(OfflineError::invalid_state(
                &task.item_id,
                "already downloading",
            )),
            TaskStatus::Pending => Ok(true),
            TaskStatus::Paused | TaskStatus::Failed => Ok(false),
        }
    }

    /// Enqueue each item in turn. One failure does not stop the rest.
    pub async fn enqueue_many(
        &self,
        items: Vec<OfflineItem>,
    ) -> Vec<(ItemId, Result<EnqueueOutcome>)> {
        let mut results = Vec::with_capacity(items.len());
        for item in items {
            let item_id = item.item_id.clone();
            let result = self.enqueue(item).await;
            if let Err(e) = &result {
                warn!(item_id = %item_id, error = %e, "Enqueue failed");
            }
            results.push((item_id, result));
        }
        results
    }

    /// Stop a pending or active download. The transfer is signalled and the
    /// task is `paused` immediately; the slot frees once the transfer winds
    /// down. No-op for tasks that are not pending or downloading.
    #[instrument(skip(self), fields(item_id = %item_id))]
    pub async fn pause(&self, item_id: &ItemId) -> Result<()> {
        {
            let state = self.shared.state.lock().await;
            if let Some(task) = self.shared.store.get_task(item_id).await? {
                self.pause_locked(&state, task).await?;
            }
        }
        self.kick().await;
        Ok(())
    }

    async fn pause_locked(&self, state: &QueueState, task: DownloadTask) -> Result<bool> {
        if !matches!(task.status, TaskStatus::Pending | TaskStatus::Downloading) {
            return Ok(false);
        }

        if let Some(token) = state.active.get(&task.item_id) {
            token.cancel();
        }

        let from = task.status;
        let task = task.pause(self.now())?;
        self.shared.store.put_task(&task).await?;
        self.emit_status(&task.item_id, from, TaskStatus::Paused);
        debug!(item_id = %task.item_id, "Download paused");
        Ok(true)
    }

    /// `paused -> pending`. The next attempt starts from byte zero.
    ///
    /// # Errors
    ///
    /// [`OfflineError::NotFound`] for unknown items and
    /// [`OfflineError::InvalidState`] for `completed` or `failed` tasks
    /// (use [`retry`](Self::retry) for the latter).
    #[instrument(skip(self), fields(item_id = %item_id))]
    pub async fn resume(&self, item_id: &ItemId) -> Result<()> {
        {
            let _state = self.shared.state.lock().await;
            let task = self
                .shared
                .store
                .get_task(item_id)
                .await?
                .ok_or_else(|| OfflineError::NotFound(item_id.to_string()))?;

            match task.status {
                TaskStatus::Paused => self.requeue_locked(task).await?,
                TaskStatus::Pending | TaskStatus::Downloading => {}
                TaskStatus::Completed | TaskStatus::Failed => {
                    return Err(OfflineError::invalid_state(
                        item_id,
                        format!("cannot resume a {} download", task.status),
                    ));
                }
            }
        }
        self.kick().await;
        Ok(())
    }

    async fn requeue_locked(&self, task: DownloadTask) -> Result<()> {
        let from = task.status;
        let task = task.requeue(self.now())?;
        self.shared.store.put_task(&task).await?;
        self.emit_status(&task.item_id, from, TaskStatus::Pending);
        self.emit(CoreEvent::Download(DownloadEvent::Queued {
            item_id: task.item_id.to_string(),
            total_bytes: task.total_bytes,
        }));
        Ok(())
    }

    /// Abort any transfer and remove the task together with its cached
    /// payload.
    ///
    /// # Errors
    ///
    /// [`OfflineError::NotFound`] if there is neither a task nor a payload.
    #[instrument(skip(self), fields(item_id = %item_id))]
    pub async fn cancel(&self, item_id: &ItemId) -> Result<()> {
        {
            let state = self.shared.state.lock().await;
            let store = &self.shared.store;

            let has_task = store.get_task(item_id).await?.is_some();
            if !has_task && !store.has_blob(item_id).await? {
                return Err(OfflineError::NotFound(item_id.to_string()));
            }

            if let Some(token) = state.active.get(item_id) {
                token.cancel();
            }

            let freed = store.evict(std::slice::from_ref(item_id)).await?;
            info!(freed_bytes = freed, "Download removed");
            self.emit(CoreEvent::Download(DownloadEvent::Removed {
                item_id: item_id.to_string(),
            }));
        }
        self.kick().await;
        Ok(())
    }

    /// `failed -> pending` with zero progress.
    ///
    /// # Errors
    ///
    /// [`OfflineError::NotFound`] for unknown items and
    /// [`OfflineError::InvalidState`] unless the task has failed.
    #[instrument(skip(self), fields(item_id = %item_id))]
    pub async fn retry(&self, item_id: &ItemId) -> Result<()> {
        {
            let _state = self.shared.state.lock().await;
            let task = self
                .shared
                .store
                .get_task(item_id)
                .await?
                .ok_or_else(|| OfflineError::NotFound(item_id.to_string()))?;

            if task.status != TaskStatus::Failed {
                return Err(OfflineError::invalid_state(
                    item_id,
                    format!("only failed downloads can be retried, this one is {}", task.status),
                ));
            }
            self.requeue_locked(task).await?;
        }
        self.kick().await;
        Ok(())
    }

    /// Pause every pending and downloading task. Returns how many changed.
    #[instrument(skip(self))]
    pub async fn pause_all(&self) -> Result<usize> {
        let mut paused = 0;
        {
            let state = self.shared.state.lock().await;
            for task in self.shared.store.all_tasks().await? {
                if self.pause_locked(&state, task).await? {
                    paused += 1;
                }
            }
        }
        info!(paused, "Paused all downloads");
        self.kick().await;
        Ok(paused)
    }

    /// Requeue every paused task. Returns how many changed.
    #[instrument(skip(self))]
    pub async fn resume_all(&self) -> Result<usize> {
        let mut resumed = 0;
        {
            let _state = self.shared.state.lock().await;
            for task in self.shared.store.tasks_by_status(TaskStatus::Paused).await? {
                self.requeue_locked(task).await?;
                resumed += 1;
            }
        }
        info!(resumed, "Resumed paused downloads");
        self.kick().await;
        Ok(resumed)
    }

    /// Promote pending tasks, oldest first, into free slots and start their
    /// transfers. Returns how many were started.
    ///
    /// Safe to call at any time: with no free slot or no pending task it
    /// changes nothing.
    pub async fn process_queue(&self) -> Result<usize> {
        let mut state = self.shared.state.lock().await;
        self.settle_orphans(&mut state).await;

        let slots = self
            .shared
            .config
            .max_concurrent_downloads
            .saturating_sub(state.active.len());
        if slots == 0 {
            return Ok(0);
        }

        // A task still winding down from a pause or cancel keeps its slot
        // until the transfer exits; its successor waits for that.
        let candidates: Vec<DownloadTask> = self
            .shared
            .store
            .tasks_by_status(TaskStatus::Pending)
            .await?
            .into_iter()
            .filter(|task| !state.active.contains_key(&task.item_id))
            .take(slots)
            .collect();

        let mut started = 0;
        for task in candidates {
            let item_id = task.item_id.clone();
            let task = task.start(self.now())?;
            self.shared.store.put_task(&task).await?;

            let token = CancellationToken::new();
            state.active.insert(item_id.clone(), token.clone());
            self.emit_status(&item_id, TaskStatus::Pending, TaskStatus::Downloading);
            debug!(item_id = %item_id, "Download started");

            core_async::task::spawn(worker::run_transfer(self.clone(), task, token));
            started += 1;
        }
        Ok(started)
    }

    /// `process_queue` for paths where a scheduling error must not mask the
    /// operation's own result.
    async fn kick(&self) {
        if let Err(e) = self.process_queue().await {
            error!(error = %e, "Failed to promote pending downloads");
        }
    }

    // ------------------------------------------------------------------------
    // Transfer bookkeeping (called by the worker)
    // ------------------------------------------------------------------------

    /// Persist a progress checkpoint unless the task has moved on.
    async fn checkpoint(&self, item_id: &ItemId, bytes: u64, total: Option<u64>) -> Result<()> {
        let _state = self.shared.state.lock().await;
        let Some(mut task) = self.shared.store.get_task(item_id).await? else {
            return Ok(());
        };
        if task.status != TaskStatus::Downloading {
            return Ok(());
        }
        task.record_progress(bytes, total, self.now());
        self.shared.store.put_task(&task).await?;
        Ok(())
    }

    /// Release the slot and record how the transfer ended.
    ///
    /// If the task was paused, cancelled or requeued while the transfer ran,
    /// the outcome is dropped. If the outcome cannot be written, the task is
    /// marked failed instead; if even that write fails, it is remembered as
    /// orphaned and failed on the next scheduling pass.
    async fn finish_transfer(
        &self,
        item_id: &ItemId,
        outcome: std::result::Result<FetchedPayload, FetchError>,
    ) -> Result<()> {
        let mut state = self.shared.state.lock().await;
        state.active.remove(item_id);

        let task = match self.shared.store.get_task(item_id).await {
            Ok(Some(task)) => task,
            Ok(None) => {
                debug!(item_id = %item_id, "Task removed during transfer");
                return Ok(());
            }
            Err(e) => {
                let message = format!("failed to record transfer outcome: {}", e);
                state.orphaned.insert(item_id.clone(), message);
                return Err(e.into());
            }
        };
        if task.status != TaskStatus::Downloading {
            debug!(item_id = %item_id, status = %task.status, "Transfer outcome superseded");
            return Ok(());
        }

        let now = self.now();
        let recorded = match outcome {
            Ok(payload) => self.store_payload(task.clone(), payload, now).await,
            Err(FetchError::Cancelled) => self.record_pause(task.clone(), now).await,
            Err(e) => {
                self.record_failure(task.clone(), OfflineError::from(e).to_string(), now)
                    .await
            }
        };

        let Err(e) = recorded else {
            return Ok(());
        };
        error!(item_id = %item_id, error = %e, "Failed to record transfer outcome");
        let message = format!("failed to record transfer outcome: {}", e);
        if let Err(e) = self.record_failure(task, message.clone(), now).await {
            state.orphaned.insert(item_id.clone(), message);
            return Err(e);
        }
        Ok(())
    }

    /// Write the blob, then mark the task completed. A completed task always
    /// has its blob, so the blob is dropped again if the task write fails.
    async fn store_payload(&self, task: DownloadTask, payload: FetchedPayload, now: i64) -> Result<()> {
        let store = &self.shared.store;
        let item_id = task.item_id.clone();
        let byte_size = payload.byte_size();

        let blob = CachedBlob::new(item_id.clone(), payload.bytes, payload.mime_type, now);
        if let Err(e) = store.put_blob(&blob).await {
            return self
                .record_failure(task, format!("failed to store payload: {}", e), now)
                .await;
        }

        let task = task.complete(byte_size, now)?;
        if let Err(e) = store.put_task(&task).await {
            if let Err(delete_err) = store.delete_blob(&item_id).await {
                warn!(item_id = %item_id, error = %delete_err, "Could not drop payload of unrecorded download");
            }
            return Err(e.into());
        }

        self.emit_status(&item_id, TaskStatus::Downloading, TaskStatus::Completed);
        self.emit(CoreEvent::Download(DownloadEvent::Completed {
            item_id: item_id.to_string(),
            byte_size,
        }));
        info!(item_id = %item_id, bytes = byte_size, "Download completed");
        Ok(())
    }

    async fn record_pause(&self, task: DownloadTask, now: i64) -> Result<()> {
        let item_id = task.item_id.clone();
        let task = task.pause(now)?;
        self.shared.store.put_task(&task).await?;
        self.emit_status(&item_id, TaskStatus::Downloading, TaskStatus::Paused);
        Ok(())
    }

    /// Mark orphaned tasks failed. Entries whose write fails again are kept.
    async fn settle_orphans(&self, state: &mut QueueState) {
        if state.orphaned.is_empty() {
            return;
        }

        let now = self.now();
        let orphaned: Vec<(ItemId, String)> = state.orphaned.drain().collect();
        for (item_id, message) in orphaned {
            let settled = match self.shared.store.get_task(&item_id).await {
                Ok(Some(task))
                    if task.status == TaskStatus::Downloading
                        && !state.active.contains_key(&item_id) =>
                {
                    self.record_failure(task, message.clone(), now).await
                }
                Ok(_) => Ok(()),
                Err(e) => Err(e.into()),
            };
            if let Err(e) = settled {
                warn!(item_id = %item_id, error = %e, "Orphaned download still unrecorded");
                state.orphaned.insert(item_id, message);
            }
        }
    }

    async fn record_failure(&self, task: DownloadTask, message: String, now: i64) -> Result<()> {
        warn!(item_id = %task.item_id, error = %message, "Download failed");
        let from = task.status;
        let task = task.fail(message.clone(), now)?;
        self.shared.store.put_task(&task).await?;
        self.emit_status(&task.item_id, from, TaskStatus::Failed);
        self.emit(CoreEvent::Download(DownloadEvent::Failed {
            item_id: task.item_id.to_string(),
            message,
        }));
        Ok(())
    }

    async fn release_slot(&self, item_id: &ItemId) {
        self.shared.state.lock().await.active.remove(item_id);
    }

    // ------------------------------------------------------------------------
    // Storage budget
    // ------------------------------------------------------------------------

    pub async fn storage_budget(&self) -> Result<StorageBudget> {
        let estimate = self.shared.store.estimate().await?;
        Ok(StorageBudget::from_estimate(
            estimate,
            self.shared.config.storage_quota_bytes,
        ))
    }

    /// Whether `size` bytes fit while keeping the configured buffer free.
    pub async fn check_availability(&self, size: u64) -> Result<bool> {
        Ok(self
            .storage_budget()
            .await?
            .admits(size, self.shared.config.storage_buffer_bytes))
    }

    /// Evict least recently used items until at least `needed` bytes are
    /// freed or nothing is left. Returns the evicted ids.
    #[instrument(skip(self))]
    pub async fn free_space(&self, needed: u64) -> Result<Vec<ItemId>> {
        let _state = self.shared.state.lock().await;
        let store = &self.shared.store;

        let victims = select_for_eviction(&store.blob_infos().await?, needed);
        if victims.is_empty() {
            return Ok(victims);
        }

        let freed = store.evict(&victims).await?;
        info!(count = victims.len(), freed_bytes = freed, "Evicted least recently used items");
        self.emit(CoreEvent::Cache(CacheEvent::Evicted {
            item_ids: victims.iter().map(ToString::to_string).collect(),
            freed_bytes: freed,
        }));
        Ok(victims)
    }

    async fn ensure_headroom(&self, size: u64) -> Result<Vec<ItemId>> {
        let buffer = self.shared.config.storage_buffer_bytes;
        let budget = self.storage_budget().await?;
        if budget.admits(size, buffer) {
            return Ok(Vec::new());
        }

        let evicted = self.free_space(budget.shortfall(size, buffer)).await?;

        let budget = self.storage_budget().await?;
        if !budget.admits(size, buffer) {
            warn!(
                needed = size.saturating_add(buffer),
                available = budget.available_bytes,
                "Storage exhausted"
            );
            return Err(OfflineError::StorageExhausted {
                needed: size.saturating_add(buffer),
                available: budget.available_bytes,
            });
        }
        Ok(evicted)
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub async fn task(&self, item_id: &ItemId) -> Result<Option<DownloadTask>> {
        Ok(self.shared.store.get_task(item_id).await?)
    }

    /// Every task, oldest first.
    pub async fn tasks(&self) -> Result<Vec<DownloadTask>> {
        Ok(self.shared.store.all_tasks().await?)
    }

    /// Number of transfers holding a slot.
    pub async fn active_count(&self) -> usize {
        self.shared.state.lock().await.active.len()
    }

    pub async fn is_cached(&self, item_id: &ItemId) -> Result<bool> {
        Ok(self.shared.store.has_blob(item_id).await?)
    }

    /// Cached payload, marking it as recently used.
    pub async fn get_cached_bytes(&self, item_id: &ItemId) -> Result<Option<Bytes>> {
        Ok(self
            .shared
            .store
            .read_blob(item_id)
            .await?
            .map(|blob| blob.bytes))
    }

    pub async fn get_storage_stats(&self) -> Result<StorageStats> {
        let budget = self.storage_budget().await?;
        let blobs = self.shared.store.blob_infos().await?;
        let tasks = self.shared.store.all_tasks().await?;
        let count = |status: TaskStatus| tasks.iter().filter(|t| t.status == status).count();

        Ok(StorageStats {
            used_bytes: budget.used_bytes,
            available_bytes: budget.available_bytes,
            quota_bytes: budget.quota_bytes,
            cached_bytes: blobs.iter().map(|b| b.byte_size).sum(),
            cached_items: blobs.len(),
            active_downloads: count(TaskStatus::Downloading),
            pending_downloads: count(TaskStatus::Pending),
            failed_downloads: count(TaskStatus::Failed),
        })
    }

    /// Remove every completed task and its payload. Returns the removed ids.
    #[instrument(skip(self))]
    pub async fn clear_completed(&self) -> Result<Vec<ItemId>> {
        let _state = self.shared.state.lock().await;
        let store = &self.shared.store;

        let item_ids: Vec<ItemId> = store
            .tasks_by_status(TaskStatus::Completed)
            .await?
            .into_iter()
            .map(|task| task.item_id)
            .collect();
        if item_ids.is_empty() {
            return Ok(item_ids);
        }

        let freed = store.evict(&item_ids).await?;
        info!(count = item_ids.len(), freed_bytes = freed, "Cleared completed downloads");
        self.emit(CoreEvent::Cache(CacheEvent::Cleared {
            item_ids: item_ids.iter().map(ToString::to_string).collect(),
            freed_bytes: freed,
        }));
        Ok(item_ids)
    }

    /// Task and cache events published by this manager (and anything else
    /// sharing its bus).
    pub fn subscribe(&self) -> EventStream {
        EventStream::new(self.shared.events.subscribe())
            .filter(|event| matches!(event, CoreEvent::Download(_) | CoreEvent::Cache(_)))
    }
}
