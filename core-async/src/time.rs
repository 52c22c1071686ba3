//! Time-related abstractions.
//!
//! # Examples
//!
//! ```rust
//! use core_async::time::{sleep, Duration, Instant};
//!
//! async fn example() {
//!     let start = Instant::now();
//!     sleep(Duration::from_millis(5)).await;
//!     assert!(start.elapsed() >= Duration::from_millis(5));
//! }
//! ```

pub use tokio::time::{error::Elapsed, interval, sleep, sleep_until, timeout, Interval, Sleep};

pub use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Returns the current wall-clock time as milliseconds since UNIX_EPOCH.
///
/// Clocks set before 1970 report `0` rather than panicking.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Returns the current wall-clock time as seconds since UNIX_EPOCH.
pub fn now_secs() -> u64 {
    now_millis() / 1000
}

/// Exponential backoff delay for the given zero-based retry `attempt`,
/// capped at `max`.
///
/// ```rust
/// use core_async::time::{backoff_delay, Duration};
///
/// let base = Duration::from_millis(100);
/// let max = Duration::from_secs(1);
/// assert_eq!(backoff_delay(base, max, 0), Duration::from_millis(100));
/// assert_eq!(backoff_delay(base, max, 2), Duration::from_millis(400));
/// assert_eq!(backoff_delay(base, max, 10), max);
/// ```
pub fn backoff_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.min(16));
    base.saturating_mul(factor).min(max)
}
