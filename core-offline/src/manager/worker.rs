//! Transfer worker.
//!
//! Runs one promoted task: streams the payload through the fetcher, turns
//! progress reports into events and throttled checkpoints, and hands the
//! outcome back to the manager. The slot is released on every path and the
//! queue is re-processed afterwards.

use super::DownloadQueueManager;
use crate::fetcher::{FetchError, FetchedPayload, ProgressReporter};
use crate::throttle::CheckpointThrottle;
use async_trait::async_trait;
use core_async::sync::CancellationToken;
use core_runtime::events::{CoreEvent, DownloadEvent};
use core_store::{DownloadTask, ItemId};
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tracing::{error, warn};

/// Boxed so the spawn in `process_queue` does not make the worker's future
/// type depend on itself.
pub(super) fn run_transfer(
    manager: DownloadQueueManager,
    task: DownloadTask,
    cancel: CancellationToken,
) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        let item_id = task.item_id.clone();
        let outcome = execute(&manager, task, &cancel).await;

        if let Err(e) = manager.finish_transfer(&item_id, outcome).await {
            error!(item_id = %item_id, error = %e, "Failed to record transfer outcome");
            manager.release_slot(&item_id).await;
        }

        manager.kick().await;
    })
}

async fn execute(
    manager: &DownloadQueueManager,
    task: DownloadTask,
    cancel: &CancellationToken,
) -> Result<FetchedPayload, FetchError> {
    let Some(source) = task.source_url.clone() else {
        return Err(FetchError::InvalidSource(format!(
            "no source location for {}",
            task.item_id
        )));
    };

    let reporter = TaskProgress::new(manager.clone(), task, cancel.clone());
    manager
        .shared
        .fetcher
        .fetch_with_progress(&source, &reporter, cancel)
        .await
}

struct Snapshot {
    task: DownloadTask,
    throttle: CheckpointThrottle,
}

/// Tracks a running task in memory and checkpoints it to the store.
struct TaskProgress {
    manager: DownloadQueueManager,
    item_id: ItemId,
    cancel: CancellationToken,
    snapshot: Mutex<Snapshot>,
}

impl TaskProgress {
    fn new(manager: DownloadQueueManager, task: DownloadTask, cancel: CancellationToken) -> Self {
        let config = manager.config();
        let throttle = CheckpointThrottle::new(
            config.progress_persist_chunks,
            config.progress_persist_interval,
            manager.now(),
        );
        Self {
            item_id: task.item_id.clone(),
            manager,
            cancel,
            snapshot: Mutex::new(Snapshot { task, throttle }),
        }
    }
}

#[async_trait]
impl ProgressReporter for TaskProgress {
    async fn on_progress(&self, bytes_transferred: u64, total_bytes: Option<u64>) {
        let now = self.manager.now();

        let (event, checkpoint_due) = {
            let mut snapshot = self.snapshot.lock();
            let before = snapshot.task.bytes_transferred;
            let changed = snapshot.task.record_progress(bytes_transferred, total_bytes, now);
            let task = &snapshot.task;

            // Without a known total the percentage cannot move, so report
            // raw byte growth instead.
            let event = (changed || (task.total_bytes.is_none() && task.bytes_transferred > before))
                .then(|| DownloadEvent::Progress {
                    item_id: task.item_id.to_string(),
                    bytes_transferred: task.bytes_transferred,
                    total_bytes: task.total_bytes,
                    percent: task.progress_percent,
                });
            let due = snapshot.throttle.tick(now);
            (event, due)
        };

        if let Some(event) = event {
            self.manager.emit(CoreEvent::Download(event));
        }

        if checkpoint_due && !self.cancel.is_cancelled() {
            if let Err(e) = self
                .manager
                .checkpoint(&self.item_id, bytes_transferred, total_bytes)
                .await
            {
                warn!(item_id = %self.item_id, error = %e, "Progress checkpoint failed");
            }
        }
    }
}
