//! # Offline Data Model
//!
//! Records persisted by the offline store: download tasks, cached audio blobs
//! and playback positions.
//!
//! Timestamps are Unix milliseconds taken from the injected
//! [`Clock`](bridge_traits::time::Clock).

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// Identifiers
// ============================================================================

/// Archive item identifier. One download task and at most one cached blob
/// exist per item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ItemId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// ============================================================================
// Task Status
// ============================================================================

/// Lifecycle state of a download task.
///
/// ```text
/// pending ──> downloading ──> completed
///   │  ▲          │  │
///   │  └──────────┘  ├──> paused ──> pending
///   │   (restart)    └──> failed ──> pending
///   ├──> paused
///   └──> failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting for a free transfer slot
    Pending,
    /// Transfer in flight
    Downloading,
    /// Stopped by the caller; resumable
    Paused,
    /// Payload stored locally
    Completed,
    /// Transfer failed; retryable
    Failed,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Pending,
        TaskStatus::Downloading,
        TaskStatus::Paused,
        TaskStatus::Completed,
        TaskStatus::Failed,
    ];

    /// The single source of truth for legal status changes.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Downloading)
                | (Pending, Paused)
                | (Pending, Failed)
                | (Downloading, Completed)
                | (Downloading, Paused)
                | (Downloading, Failed)
                | (Downloading, Pending)
                | (Paused, Pending)
                | (Failed, Pending)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed)
    }

    /// Get the string representation for database storage
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Downloading => "downloading",
            TaskStatus::Paused => "paused",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "downloading" => Ok(TaskStatus::Downloading),
            "paused" => Ok(TaskStatus::Paused),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(format!("unknown task status '{}'", other)),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected status change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("illegal transition for {item_id}: {from} -> {to}")]
pub struct InvalidTransition {
    pub item_id: ItemId,
    pub from: TaskStatus,
    pub to: TaskStatus,
}

// ============================================================================
// Download Task
// ============================================================================

/// Persistent record of one item's offline download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadTask {
    pub item_id: ItemId,
    pub status: TaskStatus,
    /// 0-100, non-decreasing while downloading
    pub progress_percent: u8,
    pub bytes_transferred: u64,
    /// Unknown until declared by the caller or advertised by the server
    pub total_bytes: Option<u64>,
    /// Where to fetch the payload from
    pub source_url: Option<String>,
    pub file_name: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub last_error: Option<String>,
}

impl DownloadTask {
    /// Create a task in the `pending` state.
    pub fn new(
        item_id: ItemId,
        source_url: Option<String>,
        file_name: Option<String>,
        total_bytes: Option<u64>,
        now: i64,
    ) -> Self {
        Self {
            item_id,
            status: TaskStatus::Pending,
            progress_percent: 0,
            bytes_transferred: 0,
            total_bytes: total_bytes.filter(|size| *size > 0),
            source_url,
            file_name,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            last_error: None,
        }
    }

    fn validate_transition(&self, to: TaskStatus) -> Result<(), InvalidTransition> {
        if self.status.can_transition_to(to) {
            Ok(())
        } else {
            Err(InvalidTransition {
                item_id: self.item_id.clone(),
                from: self.status,
                to,
            })
        }
    }

    fn reset_progress(&mut self) {
        self.progress_percent = 0;
        self.bytes_transferred = 0;
        self.started_at = None;
        self.completed_at = None;
    }

    /// `pending -> downloading`. Every transfer starts from byte zero.
    pub fn start(mut self, now: i64) -> Result<Self, InvalidTransition> {
        self.validate_transition(TaskStatus::Downloading)?;
        self.reset_progress();
        self.status = TaskStatus::Downloading;
        self.started_at = Some(now);
        self.last_error = None;
        self.updated_at = now;
        Ok(self)
    }

    /// `downloading -> completed` with the stored payload size.
    pub fn complete(mut self, byte_size: u64, now: i64) -> Result<Self, InvalidTransition> {
        self.validate_transition(TaskStatus::Completed)?;
        self.status = TaskStatus::Completed;
        self.bytes_transferred = byte_size;
        self.total_bytes = Some(byte_size);
        self.progress_percent = 100;
        self.completed_at = Some(now);
        self.last_error = None;
        self.updated_at = now;
        Ok(self)
    }

    /// `pending | downloading -> paused`. Progress is kept for display only.
    pub fn pause(mut self, now: i64) -> Result<Self, InvalidTransition> {
        self.validate_transition(TaskStatus::Paused)?;
        self.status = TaskStatus::Paused;
        self.updated_at = now;
        Ok(self)
    }

    /// `pending | downloading -> failed` with a reason.
    pub fn fail(mut self, message: impl Into<String>, now: i64) -> Result<Self, InvalidTransition> {
        self.validate_transition(TaskStatus::Failed)?;
        self.status = TaskStatus::Failed;
        self.last_error = Some(message.into());
        self.updated_at = now;
        Ok(self)
    }

    /// `paused | failed | downloading -> pending` with zeroed progress.
    pub fn requeue(mut self, now: i64) -> Result<Self, InvalidTransition> {
        self.validate_transition(TaskStatus::Pending)?;
        self.reset_progress();
        self.status = TaskStatus::Pending;
        self.last_error = None;
        self.updated_at = now;
        Ok(self)
    }

    /// Record transferred bytes while downloading.
    ///
    /// `total` refines `total_bytes` when the server advertises a length; a
    /// transfer that outgrows its declared size raises `total_bytes` to match.
    /// The percentage never decreases. Returns `true` if the percentage
    /// changed. Ignored unless the task is downloading.
    pub fn record_progress(&mut self, bytes: u64, total: Option<u64>, now: i64) -> bool {
        if self.status != TaskStatus::Downloading {
            return false;
        }

        if let Some(total) = total.filter(|t| *t > 0) {
            self.total_bytes = Some(total);
        }
        if let Some(total) = self.total_bytes {
            if bytes > total {
                self.total_bytes = Some(bytes);
            }
        }

        self.bytes_transferred = self.bytes_transferred.max(bytes);
        self.updated_at = now;

        let percent = match self.total_bytes {
            Some(total) if total > 0 => ((self.bytes_transferred * 100) / total).min(100) as u8,
            _ => self.progress_percent,
        };
        let next = percent.max(self.progress_percent);
        let changed = next != self.progress_percent;
        self.progress_percent = next;
        changed
    }

    pub fn is_active(&self) -> bool {
        self.status == TaskStatus::Downloading
    }
}

// ============================================================================
// Cached Blobs
// ============================================================================

/// Locally stored audio payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedBlob {
    pub item_id: ItemId,
    pub bytes: Bytes,
    pub byte_size: u64,
    /// Content type reported by the server, if any
    pub mime_type: Option<String>,
    pub cached_at: i64,
    /// Refreshed on every read
    pub last_accessed_at: i64,
}

impl CachedBlob {
    pub fn new(item_id: ItemId, bytes: Bytes, mime_type: Option<String>, now: i64) -> Self {
        Self {
            item_id,
            byte_size: bytes.len() as u64,
            bytes,
            mime_type,
            cached_at: now,
            last_accessed_at: now,
        }
    }

    pub fn info(&self) -> BlobInfo {
        BlobInfo {
            item_id: self.item_id.clone(),
            byte_size: self.byte_size,
            cached_at: self.cached_at,
            last_accessed_at: self.last_accessed_at,
        }
    }
}

/// Byte-less projection of a cached blob, as consumed by eviction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobInfo {
    pub item_id: ItemId,
    pub byte_size: u64,
    pub cached_at: i64,
    pub last_accessed_at: i64,
}

// ============================================================================
// Playback Progress
// ============================================================================

/// Remaining seconds below which an item counts as finished.
pub const COMPLETION_TAIL_SECONDS: f64 = 5.0;

/// Played fraction at or above which an item counts as finished.
pub const COMPLETION_RATIO: f64 = 0.95;

/// Last known listening position for an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackProgress {
    pub item_id: ItemId,
    pub position_seconds: f64,
    pub duration_seconds: f64,
    pub last_played_at: i64,
    pub is_complete: bool,
}

impl PlaybackProgress {
    /// Build a record, clamping the position into `[0, duration]` and
    /// deriving `is_complete`.
    pub fn new(item_id: ItemId, position_seconds: f64, duration_seconds: f64, now: i64) -> Self {
        let duration = if duration_seconds.is_finite() {
            duration_seconds.max(0.0)
        } else {
            0.0
        };
        let mut position = if position_seconds.is_finite() {
            position_seconds.max(0.0)
        } else {
            0.0
        };
        if duration > 0.0 {
            position = position.min(duration);
        }

        let is_complete = duration > 0.0
            && (duration - position <= COMPLETION_TAIL_SECONDS
                || position / duration >= COMPLETION_RATIO);

        Self {
            item_id,
            position_seconds: position,
            duration_seconds: duration,
            last_played_at: now,
            is_complete,
        }
    }
}

// ============================================================================
// Storage Estimate
// ============================================================================

/// Store usage together with the host quota, when the host reports one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageEstimate {
    pub usage_bytes: u64,
    pub quota_bytes: Option<u64>,
}
