//! Time and Logging Abstractions
//!
//! Injectable time source and logging sink. Download bookkeeping (creation
//! order, recency, checkpoint cadence) reads time only through [`Clock`], and
//! always as Unix milliseconds.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::error::Result;

/// Time source.
///
/// ```ignore
/// use bridge_traits::time::Clock;
///
/// fn stamp(clock: &dyn Clock) -> i64 {
///     clock.unix_timestamp_millis()
/// }
/// ```
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch
    fn unix_timestamp_millis(&self) -> i64;

    fn unix_timestamp(&self) -> i64 {
        self.unix_timestamp_millis().div_euclid(1_000)
    }

    fn now(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.unix_timestamp_millis())
            .single()
            .unwrap_or_default()
    }
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn unix_timestamp_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Manually driven clock for tests.
///
/// Starts at the given millisecond timestamp and only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    pub fn new(start_millis: i64) -> Self {
        Self {
            millis: AtomicI64::new(start_millis),
        }
    }

    pub fn set_millis(&self, millis: i64) {
        self.millis.store(millis, Ordering::SeqCst);
    }

    pub fn advance_millis(&self, delta: i64) {
        self.millis.fetch_add(delta, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(1_700_000_000_000)
    }
}

impl Clock for ManualClock {
    fn unix_timestamp_millis(&self) -> i64 {
        self.millis.load(Ordering::SeqCst)
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

/// Structured log record handed to the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub timestamp: DateTime<Utc>,
    /// Module path of the emitting code, e.g. `core_offline::manager`
    pub target: String,
    pub message: String,
    /// Event fields merged over the fields of every enclosing span
    pub fields: BTreeMap<String, String>,
    /// Names of the enclosing spans, outermost first
    pub spans: Vec<String>,
}

impl LogEntry {
    pub fn new(level: LogLevel, target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            timestamp: Utc::now(),
            target: target.into(),
            message: message.into(),
            fields: BTreeMap::new(),
            spans: Vec::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn with_span(mut self, name: impl Into<String>) -> Self {
        self.spans.push(name.into());
        self
    }

    /// The archive item this record is about, if any.
    pub fn item_id(&self) -> Option<&str> {
        self.fields.get("item_id").map(String::as_str)
    }
}

/// Forwards structured logs from the core to the host logging pipeline
/// (console, log files, or the platform's system log).
///
/// Implementations must not block; `log` is awaited off the emitting task.
#[async_trait::async_trait]
pub trait LoggerSink: Send + Sync {
    async fn log(&self, entry: LogEntry) -> Result<()>;

    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// Records below this level are dropped before they are built.
    fn min_level(&self) -> LogLevel {
        LogLevel::Info
    }
}

/// Writes one line per record to stderr. Development aid.
#[derive(Debug, Clone)]
pub struct ConsoleLogger {
    pub min_level: LogLevel,
}

impl Default for ConsoleLogger {
    fn default() -> Self {
        Self {
            min_level: LogLevel::Info,
        }
    }
}

impl ConsoleLogger {
    fn render(entry: &LogEntry) -> String {
        let mut line = format!(
            "{} {:5} {}",
            entry.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            entry.level.as_str(),
            entry.target
        );
        if !entry.spans.is_empty() {
            line.push(':');
            line.push_str(&entry.spans.join(":"));
        }
        line.push_str(": ");
        line.push_str(&entry.message);
        for (key, value) in &entry.fields {
            line.push_str(&format!(" {}={}", key, value));
        }
        line
    }
}

#[async_trait::async_trait]
impl LoggerSink for ConsoleLogger {
    async fn log(&self, entry: LogEntry) -> Result<()> {
        if entry.level >= self.min_level {
            eprintln!("{}", Self::render(&entry));
        }
        Ok(())
    }

    fn min_level(&self) -> LogLevel {
        self.min_level
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_agrees_with_itself() {
        let clock = SystemClock;
        let millis = clock.unix_timestamp_millis();
        assert!(millis > 1_600_000_000_000);
        assert!(clock.now().timestamp_millis() >= millis);
    }

    #[test]
    fn test_manual_clock_only_moves_when_told() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.unix_timestamp_millis(), 1_000);
        assert_eq!(clock.unix_timestamp_millis(), 1_000);

        clock.advance_millis(250);
        assert_eq!(clock.unix_timestamp_millis(), 1_250);
        assert_eq!(clock.now().timestamp_millis(), 1_250);

        clock.set_millis(5_999);
        assert_eq!(clock.unix_timestamp(), 5);
    }

    #[test]
    fn test_log_entry_builder() {
        let entry = LogEntry::new(LogLevel::Warn, "core_offline::manager", "Download failed")
            .with_field("item_id", "lecture-01")
            .with_span("enqueue");

        assert_eq!(entry.item_id(), Some("lecture-01"));
        assert_eq!(entry.spans, vec!["enqueue"]);
    }

    #[test]
    fn test_console_render() {
        let mut entry = LogEntry::new(LogLevel::Info, "core_offline", "Download completed")
            .with_field("item_id", "a")
            .with_field("bytes", "10")
            .with_span("finish");
        entry.timestamp = ManualClock::new(0).now();

        assert_eq!(
            ConsoleLogger::render(&entry),
            "1970-01-01T00:00:00.000Z INFO  core_offline:finish: Download completed bytes=10 item_id=a"
        );
    }

    #[core_async::test]
    async fn test_console_logger_accepts_entries() {
        let logger = ConsoleLogger::default();
        logger
            .log(LogEntry::new(LogLevel::Debug, "test", "filtered"))
            .await
            .unwrap();
    }
}
