//! Queue manager behaviour against a scripted fetcher and the in-memory store.

use async_trait::async_trait;
use bridge_traits::time::ManualClock;
use bytes::Bytes;
use core_async::sync::{CancellationToken, Semaphore};
use core_async::time::Duration;
use core_offline::{
    DownloadQueueManager, FetchError, FetchedPayload, OfflineConfig, OfflineError, OfflineItem,
    ProgressReporter, RemoteFetcher,
};
use core_runtime::events::{CacheEvent, CoreEvent, DownloadEvent, EventBus};
use core_store::{CachedBlob, DownloadTask, InMemoryStore, ItemId, OfflineStore, TaskStatus};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const KB: u64 = 1024;

macro_rules! wait_for {
    ($cond:expr) => {{
        let mut reached = false;
        for _ in 0..400 {
            if $cond {
                reached = true;
                break;
            }
            core_async::sleep(Duration::from_millis(5)).await;
        }
        assert!(reached, "condition not reached: {}", stringify!($cond));
    }};
}

// ============================================================================
// Scripted fetcher
// ============================================================================

#[derive(Clone)]
struct Plan {
    chunk_size: usize,
    chunks: usize,
    /// Wait for the gate before sending this chunk (`chunks` = after the last)
    gate_at: usize,
    /// Wait for the gate again once every chunk is out
    hold_at_end: bool,
    failure: Option<FetchError>,
}

impl Default for Plan {
    fn default() -> Self {
        Self {
            chunk_size: 3 * KB as usize,
            chunks: 5,
            gate_at: 0,
            hold_at_end: false,
            failure: None,
        }
    }
}

#[derive(Default)]
struct ScriptedFetcher {
    plans: Mutex<HashMap<String, Plan>>,
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
    starts: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedFetcher {
    fn plan(&self, id: &str, plan: Plan) {
        self.plans.lock().insert(url(id), plan);
    }

    fn gate(&self, source: &str) -> Arc<Semaphore> {
        self.gates
            .lock()
            .entry(source.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(0)))
            .clone()
    }

    /// Let one transfer of `id` past its gate.
    fn release(&self, id: &str) {
        self.gate(&url(id)).add_permits(1);
    }

    /// Let every future transfer of `id` through.
    fn open(&self, id: &str) {
        self.gate(&url(id)).add_permits(1_000);
    }

    fn starts_of(&self, id: &str) -> usize {
        let source = url(id);
        self.starts.lock().iter().filter(|s| **s == source).count()
    }

    async fn wait_gate(&self, source: &str, cancel: &CancellationToken) -> Result<(), FetchError> {
        let gate = self.gate(source);
        core_async::select! {
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            permit = gate.acquire() => {
                if let Ok(permit) = permit {
                    permit.forget();
                }
                Ok(())
            }
        }
    }

    async fn run(
        &self,
        source: &str,
        plan: Plan,
        reporter: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<FetchedPayload, FetchError> {
        let total = (plan.chunk_size * plan.chunks) as u64;
        let mut sent = 0u64;

        for chunk in 0..plan.chunks {
            if chunk == plan.gate_at {
                self.wait_gate(source, cancel).await?;
            }
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            sent += plan.chunk_size as u64;
            reporter.on_progress(sent, Some(total)).await;
            core_async::task::yield_now().await;
        }
        if plan.gate_at >= plan.chunks || plan.hold_at_end {
            self.wait_gate(source, cancel).await?;
        }

        if let Some(failure) = plan.failure {
            return Err(failure);
        }
        Ok(FetchedPayload {
            bytes: Bytes::from(vec![7u8; total as usize]),
            mime_type: Some("audio/mpeg".to_string()),
        })
    }
}

#[async_trait]
impl RemoteFetcher for ScriptedFetcher {
    async fn fetch_with_progress(
        &self,
        source: &str,
        reporter: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<FetchedPayload, FetchError> {
        self.starts.lock().push(source.to_string());
        let plan = self.plans.lock().get(source).cloned().unwrap_or_default();

        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);
        let result = self.run(source, plan, reporter, cancel).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

// ============================================================================
// Harness
// ============================================================================

fn url(id: &str) -> String {
    format!("https://archive.example/download/{id}/{id}.mp3")
}

struct Harness {
    manager: DownloadQueueManager,
    store: Arc<InMemoryStore>,
    fetcher: Arc<ScriptedFetcher>,
    clock: Arc<ManualClock>,
    events: Arc<EventBus>,
}

impl Harness {
    fn new(config: OfflineConfig) -> Self {
        let clock = Arc::new(ManualClock::new(1_000));
        let store = Arc::new(InMemoryStore::new(clock.clone()));
        Self::with_store(config, store, clock)
    }

    fn with_store(config: OfflineConfig, store: Arc<InMemoryStore>, clock: Arc<ManualClock>) -> Self {
        let fetcher = Arc::new(ScriptedFetcher::default());
        let events = Arc::new(EventBus::new(1024));
        let manager = DownloadQueueManager::new(
            config,
            store.clone(),
            fetcher.clone(),
            events.clone(),
            clock.clone(),
        )
        .unwrap();

        Self {
            manager,
            store,
            fetcher,
            clock,
            events,
        }
    }

    async fn enqueue(&self, id: &str, size: u64) -> Result<core_offline::EnqueueOutcome, OfflineError> {
        self.clock.advance_millis(1);
        self.manager.enqueue(OfflineItem::new(id, url(id), size)).await
    }

    async fn status(&self, id: &str) -> Option<TaskStatus> {
        self.store
            .get_task(&ItemId::new(id))
            .await
            .unwrap()
            .map(|t| t.status)
    }

    async fn task(&self, id: &str) -> DownloadTask {
        self.store.get_task(&ItemId::new(id)).await.unwrap().unwrap()
    }

    async fn downloading(&self) -> usize {
        self.store
            .tasks_by_status(TaskStatus::Downloading)
            .await
            .unwrap()
            .len()
    }

    async fn cache_completed(&self, id: &str, size: u64, accessed_at: i64) {
        let item_id = ItemId::new(id);
        let task = DownloadTask::new(item_id.clone(), Some(url(id)), None, Some(size), accessed_at)
            .start(accessed_at)
            .unwrap()
            .complete(size, accessed_at)
            .unwrap();
        self.store.put_task(&task).await.unwrap();
        self.store
            .put_blob(&CachedBlob::new(
                item_id,
                Bytes::from(vec![0u8; size as usize]),
                None,
                accessed_at,
            ))
            .await
            .unwrap();
    }
}

// ============================================================================
// End-to-end
// ============================================================================

#[core_async::test]
async fn single_item_downloads_to_completion() {
    let h = Harness::new(OfflineConfig::default());
    let mut events = h.manager.subscribe().for_item("X");

    let outcome = h.enqueue("X", 15 * KB).await.unwrap();
    assert_eq!(outcome.task.status, TaskStatus::Downloading);
    assert!(outcome.evicted.is_empty());

    h.fetcher.release("X");
    wait_for!(h.status("X").await == Some(TaskStatus::Completed));

    let task = h.task("X").await;
    assert_eq!(task.bytes_transferred, 15 * KB);
    assert_eq!(task.total_bytes, Some(15 * KB));
    assert_eq!(task.progress_percent, 100);
    assert!(task.completed_at.is_some());
    assert!(h.manager.is_cached(&ItemId::new("X")).await.unwrap());

    let bytes = h.manager.get_cached_bytes(&ItemId::new("X")).await.unwrap().unwrap();
    assert_eq!(bytes.len() as u64, 15 * KB);

    let mut percents = Vec::new();
    let mut completed = false;
    while let Some(Ok(event)) = events.try_recv() {
        match event {
            CoreEvent::Download(DownloadEvent::Progress { percent, .. }) => percents.push(percent),
            CoreEvent::Download(DownloadEvent::Completed { byte_size, .. }) => {
                assert_eq!(byte_size, 15 * KB);
                completed = true;
            }
            _ => {}
        }
    }
    assert!(completed);
    assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{percents:?}");
    assert_eq!(percents.last(), Some(&100));
    assert_eq!(h.manager.active_count().await, 0);
}

#[core_async::test]
async fn concurrency_cap_promotes_in_creation_order() {
    let h = Harness::new(OfflineConfig::default().with_max_concurrent_downloads(2));

    for id in ["A", "B", "C", "D", "E"] {
        h.enqueue(id, 15 * KB).await.unwrap();
    }

    assert_eq!(h.status("A").await, Some(TaskStatus::Downloading));
    assert_eq!(h.status("B").await, Some(TaskStatus::Downloading));
    for id in ["C", "D", "E"] {
        assert_eq!(h.status(id).await, Some(TaskStatus::Pending));
    }
    assert_eq!(h.manager.active_count().await, 2);

    h.fetcher.release("A");
    wait_for!(h.status("C").await == Some(TaskStatus::Downloading));

    assert_eq!(h.status("A").await, Some(TaskStatus::Completed));
    assert_eq!(h.status("B").await, Some(TaskStatus::Downloading));
    assert_eq!(h.status("D").await, Some(TaskStatus::Pending));
    assert_eq!(h.status("E").await, Some(TaskStatus::Pending));
    assert_eq!(h.downloading().await, 2);
}

#[core_async::test]
async fn downloading_count_never_exceeds_cap() {
    let h = Harness::new(OfflineConfig::default().with_max_concurrent_downloads(2));
    let ids = ["a", "b", "c", "d", "e", "f", "g"];
    for id in ids {
        h.fetcher.open(id);
    }

    for id in ids {
        h.enqueue(id, 15 * KB).await.unwrap();
        assert!(h.downloading().await <= 2);
    }

    for _ in 0..400 {
        assert!(h.downloading().await <= 2);
        let done = h
            .store
            .tasks_by_status(TaskStatus::Completed)
            .await
            .unwrap()
            .len();
        if done == ids.len() {
            break;
        }
        core_async::sleep(Duration::from_millis(2)).await;
    }

    assert_eq!(
        h.store
            .tasks_by_status(TaskStatus::Completed)
            .await
            .unwrap()
            .len(),
        ids.len()
    );
    assert!(h.fetcher.max_in_flight.load(Ordering::SeqCst) <= 2);
}

#[core_async::test]
async fn process_queue_is_idempotent() {
    let h = Harness::new(OfflineConfig::default().with_max_concurrent_downloads(2));
    for id in ["A", "B", "C"] {
        h.enqueue(id, KB).await.unwrap();
    }
    wait_for!(h.fetcher.starts_of("B") == 1);

    let writes = h.store.task_writes();
    assert_eq!(h.manager.process_queue().await.unwrap(), 0);
    assert_eq!(h.manager.process_queue().await.unwrap(), 0);

    assert_eq!(h.store.task_writes(), writes);
    assert_eq!(h.status("C").await, Some(TaskStatus::Pending));
    assert_eq!(h.fetcher.starts_of("A"), 1);
    assert_eq!(h.fetcher.starts_of("C"), 0);
}

// ============================================================================
// Pause / resume / cancel / retry
// ============================================================================

#[core_async::test]
async fn pause_frees_slot_without_caching() {
    let h = Harness::new(OfflineConfig::default().with_max_concurrent_downloads(1));
    h.enqueue("A", 15 * KB).await.unwrap();
    h.enqueue("B", 15 * KB).await.unwrap();
    assert_eq!(h.status("B").await, Some(TaskStatus::Pending));

    h.manager.pause(&ItemId::new("A")).await.unwrap();
    assert_eq!(h.status("A").await, Some(TaskStatus::Paused));

    wait_for!(h.status("B").await == Some(TaskStatus::Downloading));
    assert_eq!(h.status("A").await, Some(TaskStatus::Paused));
    assert!(!h.manager.is_cached(&ItemId::new("A")).await.unwrap());
    assert_eq!(h.manager.active_count().await, 1);

    // idempotent
    h.manager.pause(&ItemId::new("A")).await.unwrap();
    assert_eq!(h.status("A").await, Some(TaskStatus::Paused));
}

#[core_async::test]
async fn resume_restarts_transfer_from_zero() {
    let h = Harness::new(
        OfflineConfig::default()
            .with_max_concurrent_downloads(1)
            .with_progress_persist_chunks(1),
    );
    h.fetcher.plan(
        "A",
        Plan {
            gate_at: 2,
            ..Plan::default()
        },
    );
    h.enqueue("A", 15 * KB).await.unwrap();
    wait_for!(h.task("A").await.bytes_transferred > 0);

    h.manager.pause(&ItemId::new("A")).await.unwrap();
    wait_for!(h.manager.active_count().await == 0);

    h.manager.resume(&ItemId::new("A")).await.unwrap();
    wait_for!(h.fetcher.starts_of("A") == 2);
    let task = h.task("A").await;
    assert_eq!(task.status, TaskStatus::Downloading);
    assert!(task.bytes_transferred < 15 * KB);

    h.fetcher.open("A");
    wait_for!(h.status("A").await == Some(TaskStatus::Completed));
    assert_eq!(h.task("A").await.bytes_transferred, 15 * KB);
}

#[core_async::test]
async fn resume_rejects_unknown_and_failed() {
    let h = Harness::new(OfflineConfig::default());
    let err = h.manager.resume(&ItemId::new("nope")).await.unwrap_err();
    assert!(matches!(err, OfflineError::NotFound(_)));

    h.fetcher.plan(
        "F",
        Plan {
            failure: Some(FetchError::Network("reset".to_string())),
            ..Plan::default()
        },
    );
    h.fetcher.open("F");
    h.enqueue("F", KB).await.unwrap();
    wait_for!(h.status("F").await == Some(TaskStatus::Failed));

    let err = h.manager.resume(&ItemId::new("F")).await.unwrap_err();
    assert!(matches!(err, OfflineError::InvalidState { .. }));
}

#[core_async::test]
async fn cancel_removes_task_and_blob() {
    let h = Harness::new(OfflineConfig::default().with_max_concurrent_downloads(1));
    let mut events = h.manager.subscribe();
    h.enqueue("A", 15 * KB).await.unwrap();
    h.enqueue("B", 15 * KB).await.unwrap();

    h.manager.cancel(&ItemId::new("A")).await.unwrap();
    assert_eq!(h.status("A").await, None);
    wait_for!(h.status("B").await == Some(TaskStatus::Downloading));

    h.fetcher.open("B");
    wait_for!(h.status("B").await == Some(TaskStatus::Completed));
    h.manager.cancel(&ItemId::new("B")).await.unwrap();
    assert!(!h.manager.is_cached(&ItemId::new("B")).await.unwrap());

    let err = h.manager.cancel(&ItemId::new("B")).await.unwrap_err();
    assert!(matches!(err, OfflineError::NotFound(_)));

    let mut removed = Vec::new();
    while let Some(Ok(event)) = events.try_recv() {
        if let CoreEvent::Download(DownloadEvent::Removed { item_id }) = event {
            removed.push(item_id);
        }
    }
    assert_eq!(removed, vec!["A", "B"]);
}

#[core_async::test]
async fn failure_is_isolated_and_retry_requeues() {
    let h = Harness::new(OfflineConfig::default().with_max_concurrent_downloads(1));
    h.fetcher.plan(
        "A",
        Plan {
            failure: Some(FetchError::Network("connection reset".to_string())),
            ..Plan::default()
        },
    );
    h.fetcher.open("A");
    h.enqueue("A", 15 * KB).await.unwrap();
    h.enqueue("B", 15 * KB).await.unwrap();

    wait_for!(h.status("A").await == Some(TaskStatus::Failed));
    let failed = h.task("A").await;
    assert!(failed.last_error.unwrap().contains("connection reset"));
    wait_for!(h.status("B").await == Some(TaskStatus::Downloading));

    h.fetcher.plan("A", Plan::default());
    h.manager.retry(&ItemId::new("A")).await.unwrap();
    let requeued = h.task("A").await;
    assert_eq!(requeued.status, TaskStatus::Pending);
    assert_eq!(requeued.progress_percent, 0);
    assert_eq!(requeued.bytes_transferred, 0);
    assert!(requeued.last_error.is_none());

    h.fetcher.open("B");
    wait_for!(h.status("A").await == Some(TaskStatus::Completed));

    let err = h.manager.retry(&ItemId::new("A")).await.unwrap_err();
    assert!(matches!(err, OfflineError::InvalidState { .. }));
}

#[core_async::test]
async fn missing_source_fails_task() {
    let h = Harness::new(OfflineConfig::default());
    let item = OfflineItem {
        item_id: ItemId::new("nowhere"),
        source_url: None,
        file_name: None,
        declared_size: KB,
    };

    h.manager.enqueue(item).await.unwrap();
    wait_for!(h.status("nowhere").await == Some(TaskStatus::Failed));
    assert!(h
        .task("nowhere")
        .await
        .last_error
        .unwrap()
        .contains("invalid source"));
}

#[core_async::test]
async fn blob_write_failure_fails_task() {
    let h = Harness::new(OfflineConfig::default());
    h.store.fail_blob_writes(true);
    h.fetcher.open("A");

    h.enqueue("A", 15 * KB).await.unwrap();
    wait_for!(h.status("A").await == Some(TaskStatus::Failed));
    assert!(h.task("A").await.last_error.unwrap().contains("failed to store payload"));
    assert!(!h.manager.is_cached(&ItemId::new("A")).await.unwrap());
}

#[core_async::test]
async fn pause_all_and_resume_all() {
    let h = Harness::new(OfflineConfig::default().with_max_concurrent_downloads(2));
    for id in ["A", "B", "C"] {
        h.enqueue(id, KB).await.unwrap();
    }

    assert_eq!(h.manager.pause_all().await.unwrap(), 3);
    for id in ["A", "B", "C"] {
        assert_eq!(h.status(id).await, Some(TaskStatus::Paused));
    }
    wait_for!(h.manager.active_count().await == 0);

    assert_eq!(h.manager.resume_all().await.unwrap(), 3);
    wait_for!(h.downloading().await == 2);
    assert_eq!(h.status("C").await, Some(TaskStatus::Pending));
}

// ============================================================================
// Enqueue preconditions
// ============================================================================

#[core_async::test]
async fn enqueue_rejects_active_and_completed_items() {
    let h = Harness::new(OfflineConfig::default());
    h.enqueue("A", KB).await.unwrap();

    let err = h.enqueue("A", KB).await.unwrap_err();
    assert!(matches!(err, OfflineError::InvalidState { .. }));

    h.fetcher.open("A");
    wait_for!(h.status("A").await == Some(TaskStatus::Completed));
    let err = h.enqueue("A", KB).await.unwrap_err();
    assert!(matches!(err, OfflineError::InvalidState { .. }));
}

#[core_async::test]
async fn enqueue_many_is_best_effort() {
    let h = Harness::new(OfflineConfig::default().with_max_concurrent_downloads(1));
    h.enqueue("A", KB).await.unwrap();

    let results = h
        .manager
        .enqueue_many(vec![
            OfflineItem::new("B", url("B"), KB),
            OfflineItem::new("A", url("A"), KB),
            OfflineItem::new("C", url("C"), KB),
        ])
        .await;

    let ok: Vec<_> = results.iter().map(|(id, r)| (id.to_string(), r.is_ok())).collect();
    assert_eq!(
        ok,
        vec![
            ("B".to_string(), true),
            ("A".to_string(), false),
            ("C".to_string(), true)
        ]
    );
    assert_eq!(h.status("C").await, Some(TaskStatus::Pending));
}

// ============================================================================
// Storage budget
// ============================================================================

#[core_async::test]
async fn budget_check_rejects_then_admits_after_space_frees() {
    let clock = Arc::new(ManualClock::new(1_000));
    let store = Arc::new(InMemoryStore::new(clock.clone()).with_quota(100 * KB));
    store.set_external_usage(90 * KB);
    let h = Harness::with_store(
        OfflineConfig::default()
            .with_storage_quota(500 * KB)
            .with_storage_buffer(10 * KB),
        store,
        clock,
    );

    assert!(!h.manager.check_availability(5 * KB).await.unwrap());
    let err = h.enqueue("X", 5 * KB).await.unwrap_err();
    match err {
        OfflineError::StorageExhausted { needed, available } => {
            assert_eq!(needed, 15 * KB);
            assert_eq!(available, 10 * KB);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(h.status("X").await, None);

    h.store.set_external_usage(75 * KB);
    let outcome = h.enqueue("X", 5 * KB).await.unwrap();
    assert!(outcome.evicted.is_empty());
    assert_eq!(h.status("X").await, Some(TaskStatus::Downloading));
}

#[core_async::test]
async fn enqueue_evicts_least_recently_used_and_reports_it() {
    let clock = Arc::new(ManualClock::new(1_000));
    let store = Arc::new(InMemoryStore::new(clock.clone()).with_quota(100 * KB));
    let h = Harness::with_store(
        OfflineConfig::default()
            .with_storage_quota(500 * KB)
            .with_storage_buffer(10 * KB),
        store,
        clock,
    );
    let mut events = h.manager.subscribe();

    h.cache_completed("A", 10 * KB, 100).await;
    h.cache_completed("B", 20 * KB, 200).await;
    h.cache_completed("C", 30 * KB, 300).await;
    h.store.set_external_usage(30 * KB);

    // used 90 of 100: a 15 KB item needs 25 free, so 15 must go
    let outcome = h.enqueue("X", 15 * KB).await.unwrap();
    let evicted: Vec<_> = outcome.evicted.iter().map(ToString::to_string).collect();
    assert_eq!(evicted, vec!["A", "B"]);

    assert_eq!(h.status("A").await, None);
    assert_eq!(h.status("B").await, None);
    assert_eq!(h.status("C").await, Some(TaskStatus::Completed));
    assert!(h.manager.is_cached(&ItemId::new("C")).await.unwrap());

    let mut saw_eviction = false;
    while let Some(Ok(event)) = events.try_recv() {
        if let CoreEvent::Cache(CacheEvent::Evicted {
            item_ids,
            freed_bytes,
        }) = event
        {
            assert_eq!(item_ids, vec!["A", "B"]);
            assert_eq!(freed_bytes, 30 * KB);
            saw_eviction = true;
        }
    }
    assert!(saw_eviction);
}

#[core_async::test]
async fn storage_exhausted_after_evicting_everything() {
    let clock = Arc::new(ManualClock::new(1_000));
    let store = Arc::new(InMemoryStore::new(clock.clone()).with_quota(100 * KB));
    let h = Harness::with_store(
        OfflineConfig::default()
            .with_storage_quota(500 * KB)
            .with_storage_buffer(10 * KB),
        store,
        clock,
    );
    h.cache_completed("A", 10 * KB, 100).await;
    h.store.set_external_usage(85 * KB);

    let err = h.enqueue("X", 20 * KB).await.unwrap_err();
    assert!(matches!(err, OfflineError::StorageExhausted { .. }));
    assert!(!h.manager.is_cached(&ItemId::new("A")).await.unwrap());
    assert_eq!(h.status("X").await, None);
}

#[core_async::test]
async fn stats_and_clear_completed() {
    let h = Harness::new(
        OfflineConfig::default()
            .with_storage_quota(1_000 * KB)
            .with_storage_buffer(10 * KB),
    );
    h.cache_completed("A", 10 * KB, 100).await;
    h.cache_completed("B", 20 * KB, 200).await;
    h.enqueue("P", KB).await.unwrap();

    let stats = h.manager.get_storage_stats().await.unwrap();
    assert_eq!(stats.cached_items, 2);
    assert_eq!(stats.cached_bytes, 30 * KB);
    assert_eq!(stats.quota_bytes, 1_000 * KB);
    assert_eq!(stats.active_downloads, 1);
    assert!(!stats.is_near_capacity());

    let mut cleared: Vec<_> = h
        .manager
        .clear_completed()
        .await
        .unwrap()
        .into_iter()
        .map(|id| id.to_string())
        .collect();
    cleared.sort();
    assert_eq!(cleared, vec!["A", "B"]);
    assert_eq!(h.manager.get_storage_stats().await.unwrap().cached_items, 0);
    assert_eq!(h.status("P").await, Some(TaskStatus::Downloading));
}

// ============================================================================
// Recovery and checkpoints
// ============================================================================

#[core_async::test]
async fn recovery_requeues_interrupted_downloads() {
    let clock = Arc::new(ManualClock::new(1_000));
    let store = Arc::new(InMemoryStore::new(clock.clone()));

    let mut interrupted = DownloadTask::new(ItemId::new("A"), Some(url("A")), None, Some(100), 1)
        .start(2)
        .unwrap();
    interrupted.record_progress(40, None, 3);
    store.put_task(&interrupted).await.unwrap();

    let orphan = DownloadTask::new(ItemId::new("ghost"), Some(url("ghost")), None, Some(10), 1)
        .start(2)
        .unwrap()
        .complete(10, 3)
        .unwrap();
    store.put_task(&orphan).await.unwrap();

    let h = Harness::with_store(OfflineConfig::default(), store, clock);
    let report = h.manager.recover().await.unwrap();

    assert_eq!(report.requeued, vec![ItemId::new("A")]);
    assert_eq!(report.repaired, vec![ItemId::new("ghost")]);

    let task = h.task("A").await;
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.progress_percent, 0);
    assert_eq!(task.bytes_transferred, 0);
    assert_eq!(h.status("ghost").await, None);

    h.manager.initialize().await.unwrap();
    assert_eq!(h.status("A").await, Some(TaskStatus::Downloading));
}

#[core_async::test]
async fn progress_is_checkpointed_every_few_chunks() {
    let h = Harness::new(OfflineConfig::default().with_progress_persist_chunks(2));
    h.fetcher.plan(
        "A",
        Plan {
            chunk_size: KB as usize,
            chunks: 8,
            gate_at: 5,
            ..Plan::default()
        },
    );
    // five chunks go out before the gate; checkpoints land on every second
    h.enqueue("A", 8 * KB).await.unwrap();
    wait_for!(h.task("A").await.bytes_transferred == 4 * KB);

    let task = h.task("A").await;
    assert_eq!(task.status, TaskStatus::Downloading);
    assert_eq!(task.progress_percent, 50);

    h.fetcher.release("A");
    wait_for!(h.status("A").await == Some(TaskStatus::Completed));
}

#[core_async::test]
async fn progress_is_checkpointed_once_the_interval_elapses() {
    let h = Harness::new(
        OfflineConfig::default()
            .with_progress_persist_chunks(100)
            .with_progress_persist_interval(Duration::from_secs(5)),
    );
    h.fetcher.plan(
        "A",
        Plan {
            chunk_size: KB as usize,
            chunks: 4,
            gate_at: 2,
            hold_at_end: true,
            ..Plan::default()
        },
    );

    h.enqueue("A", 4 * KB).await.unwrap();
    wait_for!(h.fetcher.starts_of("A") == 1);
    for _ in 0..10 {
        core_async::task::yield_now().await;
    }
    // two chunks are out, but no time has passed on the clock
    assert_eq!(h.task("A").await.bytes_transferred, 0);

    h.clock.advance_millis(5_000);
    h.fetcher.release("A");
    wait_for!(h.task("A").await.bytes_transferred == 3 * KB);
    let task = h.task("A").await;
    assert_eq!(task.status, TaskStatus::Downloading);
    assert_eq!(task.progress_percent, 75);

    h.fetcher.release("A");
    wait_for!(h.status("A").await == Some(TaskStatus::Completed));
}

#[core_async::test]
async fn unrecorded_completion_fails_task_and_drops_payload() {
    let h = Harness::new(OfflineConfig::default().with_max_concurrent_downloads(1));
    h.store.fail_task_writes(&[TaskStatus::Completed]);
    h.fetcher.open("A");
    h.fetcher.open("B");

    h.enqueue("A", 15 * KB).await.unwrap();
    h.enqueue("B", 15 * KB).await.unwrap();

    wait_for!(h.status("A").await == Some(TaskStatus::Failed));
    let failed = h.task("A").await;
    assert!(failed
        .last_error
        .unwrap()
        .contains("failed to record transfer outcome"));
    assert!(!h.manager.is_cached(&ItemId::new("A")).await.unwrap());

    // the slot was handed on
    wait_for!(h.status("B").await == Some(TaskStatus::Failed));

    h.store.fail_task_writes(&[]);
    h.manager.retry(&ItemId::new("A")).await.unwrap();
    wait_for!(h.status("A").await == Some(TaskStatus::Completed));
}

#[core_async::test]
async fn orphaned_transfer_is_failed_on_next_scheduling_pass() {
    let h = Harness::new(OfflineConfig::default());
    h.store
        .fail_task_writes(&[TaskStatus::Completed, TaskStatus::Failed]);
    h.fetcher.open("A");

    h.enqueue("A", 15 * KB).await.unwrap();
    wait_for!(h.fetcher.starts_of("A") == 1);
    wait_for!(h.manager.active_count().await == 0);

    // neither outcome could be written, so the store still says downloading
    assert_eq!(h.status("A").await, Some(TaskStatus::Downloading));
    assert!(!h.manager.is_cached(&ItemId::new("A")).await.unwrap());

    h.store.fail_task_writes(&[]);
    h.manager.process_queue().await.unwrap();
    let task = h.task("A").await;
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task
        .last_error
        .unwrap()
        .contains("failed to record transfer outcome"));

    h.enqueue("A", 15 * KB).await.unwrap();
    wait_for!(h.status("A").await == Some(TaskStatus::Completed));
}

#[core_async::test]
async fn events_reach_independent_subscribers() {
    let h = Harness::new(OfflineConfig::default());
    let mut first = h.manager.subscribe().for_item("A");
    let mut raw = h.events.subscribe();

    h.enqueue("A", KB).await.unwrap();

    let event = first.recv().await.unwrap();
    assert!(matches!(
        event,
        CoreEvent::Download(DownloadEvent::Queued { ref item_id, total_bytes: Some(_) }) if item_id == "A"
    ));
    assert!(matches!(raw.recv().await.unwrap(), CoreEvent::Download(_)));
}
