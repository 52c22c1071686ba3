//! Installing the global subscriber. It can only be installed once per
//! process, so every assertion about the installed subscriber lives in one
//! test.

use async_trait::async_trait;
use bridge_traits::error::Result as SinkResult;
use bridge_traits::time::{LogEntry, LogLevel, LoggerSink};
use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct CapturingSink {
    entries: Mutex<Vec<LogEntry>>,
}

#[async_trait]
impl LoggerSink for CapturingSink {
    async fn log(&self, entry: LogEntry) -> SinkResult<()> {
        self.entries.lock().unwrap().push(entry);
        Ok(())
    }

    fn min_level(&self) -> LogLevel {
        LogLevel::Info
    }
}

#[test]
fn test_init_logging_installs_once_and_forwards_to_sink() {
    let sink = Arc::new(CapturingSink::default());
    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_ansi(false)
        .with_level(LogLevel::Debug)
        .with_logger_sink(sink.clone());

    init_logging(config.clone()).expect("first initialization succeeds");
    assert!(init_logging(config).is_err());

    let span = tracing::info_span!(target: "core_offline", "enqueue", item_id = "item-9");
    span.in_scope(|| {
        tracing::info!(target: "core_offline", bytes = 15u64, "Download completed");
        tracing::debug!(target: "core_offline", "below the sink threshold");
    });
    // Filtered out by the default directives before reaching the sink
    tracing::info!(target: "sqlx::query", "select 1");

    let entries = sink.entries.lock().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].message, "Download completed");
    assert_eq!(entries[0].item_id(), Some("item-9"));
    assert_eq!(entries[0].fields.get("bytes"), Some(&"15".to_string()));
}

#[test]
fn test_invalid_custom_filter_is_rejected_before_install() {
    let config = LoggingConfig::default().with_filter("core_offline=notalevel");
    assert!(init_logging(config).is_err());
}
