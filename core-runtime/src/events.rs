//! # Event Bus System
//!
//! Typed events published by the offline core over `tokio::sync::broadcast`.
//! The download queue, the cache and the playback-position store all publish
//! here; UI layers subscribe and render.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────┐   emit    ┌───────────┐
//! │ Download queue ├──────────>│           │
//! └────────────────┘           │ EventBus  │    subscribe    ┌────────────┐
//! ┌────────────────┐   emit    │ (broadcast├────────────────>│ Subscriber │
//! │ Cache eviction ├──────────>│  channel) │                 └────────────┘
//! └────────────────┘           │           │    subscribe    ┌────────────┐
//! ┌────────────────┐   emit    │           ├────────────────>│ Subscriber │
//! │ Playback cache ├──────────>│           │                 └────────────┘
//! └────────────────┘           └───────────┘
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::events::{CoreEvent, DownloadEvent, EventBus};
//!
//! let event_bus = EventBus::new(100);
//! let mut stream = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Download(DownloadEvent::Removed {
//!         item_id: "librivox-item".to_string(),
//!     }))
//!     .ok();
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber was too slow and missed `n`
//!   events. Non-fatal; task state in the store remains authoritative, so a
//!   lagging UI should re-read it.
//! - **`RecvError::Closed`**: all senders dropped. Treat as shutdown.
//!
//! Publishing with no subscribers returns `Err`; publishers ignore it.

use core_async::sync::broadcast;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use core_async::sync::broadcast::error::{RecvError, SendError};
pub use core_async::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// Progress events dominate the volume; subscribers that can't keep up will
/// receive `RecvError::Lagged`.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Download queue events
    Download(DownloadEvent),
    /// Offline cache events
    Cache(CacheEvent),
    /// Playback position events
    Playback(PlaybackEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Download(e) => e.description(),
            CoreEvent::Cache(e) => e.description(),
            CoreEvent::Playback(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Download(DownloadEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Cache(CacheEvent::Evicted { .. }) => EventSeverity::Warning,
            CoreEvent::Download(DownloadEvent::Completed { .. }) => EventSeverity::Info,
            CoreEvent::Download(DownloadEvent::Queued { .. }) => EventSeverity::Info,
            CoreEvent::Cache(CacheEvent::Cleared { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }

    /// Item the event refers to, when it refers to exactly one.
    pub fn item_id(&self) -> Option<&str> {
        match self {
            CoreEvent::Download(e) => Some(e.item_id()),
            CoreEvent::Playback(PlaybackEvent::PositionSaved { item_id, .. }) => Some(item_id),
            CoreEvent::Cache(_) => None,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    /// Debug-level events (verbose)
    Debug,
    /// Informational events
    Info,
    /// Warning events
    Warning,
    /// Error events
    Error,
}

// ============================================================================
// Download Events
// ============================================================================

/// Events emitted by the download queue as tasks move through their
/// lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum DownloadEvent {
    /// A task was created (or re-created) in the pending state.
    Queued {
        item_id: String,
        /// Declared payload size, if known up front.
        total_bytes: Option<u64>,
    },
    /// A task changed status. Statuses use their persisted names
    /// (`pending`, `downloading`, `paused`, `completed`, `failed`).
    StatusChanged {
        item_id: String,
        from: String,
        to: String,
    },
    /// Incremental transfer progress.
    Progress {
        item_id: String,
        bytes_transferred: u64,
        total_bytes: Option<u64>,
        /// 0-100
        percent: u8,
    },
    /// Payload stored; the item is available offline.
    Completed { item_id: String, byte_size: u64 },
    /// Transfer failed; the task keeps the message in `last_error`.
    Failed { item_id: String, message: String },
    /// Task and any cached bytes were removed by the caller.
    Removed { item_id: String },
}

impl DownloadEvent {
    fn description(&self) -> &str {
        match self {
            DownloadEvent::Queued { .. } => "Download queued",
            DownloadEvent::StatusChanged { .. } => "Download status changed",
            DownloadEvent::Progress { .. } => "Download in progress",
            DownloadEvent::Completed { .. } => "Download completed",
            DownloadEvent::Failed { .. } => "Download failed",
            DownloadEvent::Removed { .. } => "Download removed",
        }
    }

    pub fn item_id(&self) -> &str {
        match self {
            DownloadEvent::Queued { item_id, .. }
            | DownloadEvent::StatusChanged { item_id, .. }
            | DownloadEvent::Progress { item_id, .. }
            | DownloadEvent::Completed { item_id, .. }
            | DownloadEvent::Failed { item_id, .. }
            | DownloadEvent::Removed { item_id } => item_id,
        }
    }
}

// ============================================================================
// Cache Events
// ============================================================================

/// Events related to the offline blob cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum CacheEvent {
    /// Least-recently-used items were evicted to make room for a new download.
    Evicted {
        item_ids: Vec<String>,
        freed_bytes: u64,
    },
    /// Completed downloads were cleared on request.
    Cleared {
        item_ids: Vec<String>,
        freed_bytes: u64,
    },
}

impl CacheEvent {
    fn description(&self) -> &str {
        match self {
            CacheEvent::Evicted { .. } => "Cached items evicted",
            CacheEvent::Cleared { .. } => "Cached items cleared",
        }
    }
}

// ============================================================================
// Playback Events
// ============================================================================

/// Events related to persisted playback position.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum PlaybackEvent {
    /// A playback position was recorded.
    PositionSaved {
        item_id: String,
        position_ms: u64,
        duration_ms: u64,
        is_complete: bool,
    },
}

impl PlaybackEvent {
    fn description(&self) -> &str {
        match self {
            PlaybackEvent::PositionSaved { .. } => "Playback position saved",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
///
/// Uses `tokio::sync::broadcast` internally, which provides:
/// - Multiple producers (clone the `EventBus`)
/// - Multiple consumers (each `subscribe()` creates a new receiver)
/// - Non-blocking sends (events are cloned for each subscriber)
/// - Lagging detection (slow subscribers get `RecvError::Lagged`)
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Maximum number of events to buffer per subscriber.
    ///   When a subscriber falls behind by more than this amount, it will
    ///   receive a `RecvError::Lagged` error.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Creates a new event bus with the default buffer size.
    #[allow(clippy::should_implement_trait)]
    pub fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event.
    /// Returns an error if there are no active subscribers.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber to receive events.
    ///
    /// Each call creates an independent receiver that will receive all future events.
    /// Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

/// Type alias for event filter functions.
type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with optional filtering.
///
/// ```ignore
/// let downloads_only = EventStream::new(event_bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Download(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    /// Creates a new event stream from a receiver.
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Adds a filter function to this stream.
    ///
    /// Only events that match the filter will be returned by `recv()`.
    /// Filters stack: an event must pass every one added.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(match self.filter.take() {
            Some(existing) => Box::new(move |event: &CoreEvent| existing(event) && predicate(event)),
            None => Box::new(predicate),
        });
        self
    }

    /// Restrict the stream to events about one item.
    pub fn for_item(self, item_id: impl Into<String>) -> Self {
        let item_id = item_id.into();
        self.filter(move |event| event.item_id() == Some(item_id.as_str()))
    }

    /// Receives the next event that passes the filter (if any).
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;

            let Some(filter) = &self.filter else {
                return Ok(event);
            };

            if filter(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive an event without blocking.
    ///
    /// Returns `None` if no events are currently available.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    let Some(filter) = &self.filter else {
                        return Some(Ok(event));
                    };

                    if filter(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
