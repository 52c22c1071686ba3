//! Runtime-agnostic async layer for the offline audio core.
//!
//! Every `core-*` and `provider-*` crate depends on this crate rather than on
//! tokio directly, so the executor can be swapped by editing one place.
//!
//! # Modules
//!
//! - `task`: Task spawning and execution
//! - `time`: Sleep, timeouts, wall-clock helpers
//! - `sync`: Mutexes, channels, semaphores and `CancellationToken`
//! - `runtime`: Blocking entry points used by the attribute macros
//!
//! # Examples
//!
//! ```rust
//! use core_async::task;
//! use core_async::time::{sleep, Duration};
//!
//! async fn example() {
//!     let handle = task::spawn(async {
//!         sleep(Duration::from_millis(10)).await;
//!         42
//!     });
//!     assert_eq!(handle.await.unwrap(), 42);
//! }
//! ```

// Re-export the async entry-point/test macros so downstream crates never need
// direct Tokio dependencies.
pub use core_async_macros::{main, test};

pub mod runtime;
pub mod sync;
pub mod task;
pub mod time;

pub use task::spawn;

/// Waits on several branches and runs the first to complete.
pub use tokio::select;
pub use time::{sleep, Duration, Instant};
