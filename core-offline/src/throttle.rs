//! Progress checkpoint throttling.
//!
//! A transfer reports progress on every chunk; persisting each report would
//! turn a download into thousands of store writes. The throttle lets a
//! checkpoint through after `every_chunks` reports or once `interval` has
//! elapsed, whichever comes first.
//!
//! Time is passed in as Unix milliseconds read from the manager's `Clock`.

use std::time::Duration;

pub struct CheckpointThrottle {
    every_chunks: u32,
    interval_ms: i64,
    chunks_since: u32,
    last_checkpoint_ms: i64,
}

impl CheckpointThrottle {
    pub fn new(every_chunks: u32, interval: Duration, now_ms: i64) -> Self {
        Self {
            every_chunks: every_chunks.max(1),
            interval_ms: i64::try_from(interval.as_millis()).unwrap_or(i64::MAX),
            chunks_since: 0,
            last_checkpoint_ms: now_ms,
        }
    }

    /// Count one chunk seen at `now_ms`. Returns `true` when a checkpoint is
    /// due.
    pub fn tick(&mut self, now_ms: i64) -> bool {
        self.chunks_since += 1;
        let elapsed = now_ms.saturating_sub(self.last_checkpoint_ms);
        if self.chunks_since >= self.every_chunks || elapsed >= self.interval_ms {
            self.reset(now_ms);
            return true;
        }
        false
    }

    /// Start a new window, as after a checkpoint.
    pub fn reset(&mut self, now_ms: i64) {
        self.chunks_since = 0;
        self.last_checkpoint_ms = now_ms;
    }
}
