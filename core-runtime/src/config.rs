//! # Core Configuration Module
//!
//! Builder-based configuration for the offline audio core.
//!
//! ## Overview
//!
//! `CoreConfig` carries the host bridges and the handful of paths and URLs the
//! core needs. The builder validates eagerly so a misconfigured host fails at
//! startup rather than on the first download.
//!
//! ## Required Dependencies
//!
//! - `HttpClient` - metadata lookups and audio downloads (desktop default:
//!   reqwest)
//!
//! ## Optional Dependencies (with defaults)
//!
//! - `StorageEstimator` - host quota and usage (desktop default: data
//!   directory walk; otherwise "unknown")
//! - `Clock` - time source (default: system clock)
//! - `LoggerSink` - host log forwarding (default: none)
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//!
//! let config = CoreConfig::builder()
//!     .database_path("/path/to/offline.db")
//!     .build()?;
//! ```
//!
//! Without the `desktop-shims` feature, omitting the HTTP client fails with
//! an actionable `CapabilityMissing` error:
//!
//! ```ignore
//! let err = CoreConfig::builder().database_path(":memory:").build().unwrap_err();
//! assert!(matches!(err, core_runtime::Error::CapabilityMissing { .. }));
//! ```

use crate::error::{Error, Result};
use crate::events::DEFAULT_EVENT_BUFFER_SIZE;
use bridge_traits::{
    Clock, HttpClient, LoggerSink, StorageEstimator, SystemClock, UnknownStorageEstimator,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Public archive endpoint used when no base URL is configured.
pub const DEFAULT_ARCHIVE_BASE_URL: &str = "https://archive.org";

/// Database path that selects an in-memory SQLite database.
pub const IN_MEMORY_DATABASE: &str = ":memory:";

/// Core configuration.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Path to the SQLite database file, or `:memory:`
    pub database_path: PathBuf,

    /// Base URL of the archive API (metadata and download endpoints)
    pub archive_base_url: String,

    /// HTTP client for metadata and downloads
    pub http_client: Arc<dyn HttpClient>,

    /// Host storage accounting
    pub storage_estimator: Arc<dyn StorageEstimator>,

    /// Time source
    pub clock: Arc<dyn Clock>,

    /// Optional host log forwarding
    pub logger_sink: Option<Arc<dyn LoggerSink>>,

    /// Capacity of the event bus channel
    pub event_buffer_size: usize,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("database_path", &self.database_path)
            .field("archive_base_url", &self.archive_base_url)
            .field("http_client", &"HttpClient { ... }")
            .field("storage_estimator", &"StorageEstimator { ... }")
            .field("clock", &"Clock { ... }")
            .field(
                "logger_sink",
                &self.logger_sink.as_ref().map(|_| "LoggerSink { ... }"),
            )
            .field("event_buffer_size", &self.event_buffer_size)
            .finish()
    }
}

impl CoreConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Whether the database lives only in memory.
    pub fn is_in_memory(&self) -> bool {
        self.database_path.as_os_str() == IN_MEMORY_DATABASE
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Database path is not empty
    /// - Archive base URL is an absolute http(s) URL
    /// - Event buffer size is non-zero
    pub fn validate(&self) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            return Err(Error::Config("Database path cannot be empty".to_string()));
        }

        if !(self.archive_base_url.starts_with("https://")
            || self.archive_base_url.starts_with("http://"))
        {
            return Err(Error::Config(format!(
                "Archive base URL must start with http:// or https://, got '{}'",
                self.archive_base_url
            )));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn http_client_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: "HttpClient implementation is required for metadata lookups and downloads. \
                 Desktop: ensure the 'desktop-shims' feature is enabled to use the default ReqwestHttpClient. \
                 Other hosts: inject an adapter over the platform's fetch API."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    use bridge_desktop::ReqwestHttpClient;

    let client: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::new());
    Ok(client)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(http_client_missing_error())
}

#[cfg(feature = "desktop-shims")]
fn provide_default_storage_estimator(database_path: &Path) -> Arc<dyn StorageEstimator> {
    use bridge_desktop::DiskUsageEstimator;

    if database_path.as_os_str() == IN_MEMORY_DATABASE {
        return Arc::new(UnknownStorageEstimator);
    }

    match database_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            Arc::new(DiskUsageEstimator::with_root(parent))
        }
        _ => Arc::new(UnknownStorageEstimator),
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_storage_estimator(_database_path: &Path) -> Arc<dyn StorageEstimator> {
    Arc::new(UnknownStorageEstimator)
}

/// Builder for constructing [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    database_path: Option<PathBuf>,
    archive_base_url: Option<String>,
    http_client: Option<Arc<dyn HttpClient>>,
    storage_estimator: Option<Arc<dyn StorageEstimator>>,
    clock: Option<Arc<dyn Clock>>,
    logger_sink: Option<Arc<dyn LoggerSink>>,
    event_buffer_size: Option<usize>,
}

impl CoreConfigBuilder {
    /// Sets the database path. Use `:memory:` for an ephemeral store.
    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Sets the archive API base URL. A trailing slash is trimmed.
    pub fn archive_base_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.archive_base_url = Some(url.trim_end_matches('/').to_string());
        self
    }

    /// Sets the HTTP client implementation.
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Sets the host storage estimator.
    pub fn storage_estimator(mut self, estimator: Arc<dyn StorageEstimator>) -> Self {
        self.storage_estimator = Some(estimator);
        self
    }

    /// Sets the time source.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Forwards core logs to a host logger.
    pub fn logger_sink(mut self, sink: Arc<dyn LoggerSink>) -> Self {
        self.logger_sink = Some(sink);
        self
    }

    /// Sets the event bus capacity.
    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    /// Builds the final `CoreConfig` instance.
    ///
    /// # Errors
    ///
    /// - `Error::Config` when the database path is missing or a value is invalid
    /// - `Error::CapabilityMissing` when no HTTP client is available
    pub fn build(self) -> Result<CoreConfig> {
        let database_path = self.database_path.ok_or_else(|| {
            Error::Config("Database path is required. Use .database_path() to set it.".to_string())
        })?;

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client()?,
        };

        let storage_estimator = self
            .storage_estimator
            .unwrap_or_else(|| provide_default_storage_estimator(&database_path));

        let config = CoreConfig {
            database_path,
            archive_base_url: self
                .archive_base_url
                .unwrap_or_else(|| DEFAULT_ARCHIVE_BASE_URL.to_string()),
            http_client,
            storage_estimator,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            logger_sink: self.logger_sink,
            event_buffer_size: self.event_buffer_size.unwrap_or(DEFAULT_EVENT_BUFFER_SIZE),
        };

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::http::{HttpRequest, HttpResponse, HttpStream};
    use bridge_traits::BridgeError;

    struct NoopHttpClient;

    #[async_trait]
    impl HttpClient for NoopHttpClient {
        async fn execute(&self, _request: HttpRequest) -> BridgeResult<HttpResponse> {
            Err(BridgeError::NotAvailable("noop".to_string()))
        }

        async fn download_stream(&self, _request: HttpRequest) -> BridgeResult<HttpStream> {
            Err(BridgeError::NotAvailable("noop".to_string()))
        }
    }

    fn builder() -> CoreConfigBuilder {
        CoreConfig::builder().http_client(Arc::new(NoopHttpClient))
    }

    #[test]
    fn test_builder_defaults() {
        let config = builder().database_path(IN_MEMORY_DATABASE).build().unwrap();

        assert!(config.is_in_memory());
        assert_eq!(config.archive_base_url, DEFAULT_ARCHIVE_BASE_URL);
        assert_eq!(config.event_buffer_size, DEFAULT_EVENT_BUFFER_SIZE);
        assert!(config.logger_sink.is_none());
    }

    #[test]
    fn test_missing_database_path() {
        let err = builder().build().unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("Database path")));
    }

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let config = builder()
            .database_path("/tmp/offline.db")
            .archive_base_url("http://localhost:8080/")
            .build()
            .unwrap();

        assert_eq!(config.archive_base_url, "http://localhost:8080");
        assert!(!config.is_in_memory());
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let err = builder()
            .database_path(IN_MEMORY_DATABASE)
            .archive_base_url("ftp://archive")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_zero_event_buffer_rejected() {
        let err = builder()
            .database_path(IN_MEMORY_DATABASE)
            .event_buffer_size(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("Event buffer")));
    }

    #[cfg(not(feature = "desktop-shims"))]
    #[test]
    fn test_missing_http_client_is_actionable() {
        let err = CoreConfig::builder()
            .database_path(IN_MEMORY_DATABASE)
            .build()
            .unwrap_err();

        match err {
            Error::CapabilityMissing {
                capability,
                message,
            } => {
                assert_eq!(capability, "HttpClient");
                assert!(message.contains("desktop-shims"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(feature = "desktop-shims")]
    #[test]
    fn test_desktop_defaults_are_injected() {
        let config = CoreConfig::builder()
            .database_path(IN_MEMORY_DATABASE)
            .build()
            .unwrap();

        assert!(config.is_in_memory());
    }
}
