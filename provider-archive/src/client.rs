//! Archive metadata client
//!
//! Resolves an item identifier into its audio files and builds the download
//! URLs the offline manager fetches from.

use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::error::{ArchiveError, Result};
use crate::types::{ArchiveFile, MetadataResponse};

/// Public archive endpoint
pub const DEFAULT_BASE_URL: &str = "https://archive.org";

/// Metadata lookups give up after this long per attempt
pub const DEFAULT_METADATA_TIMEOUT: Duration = Duration::from_secs(15);

/// Archive client configuration
#[derive(Debug, Clone)]
pub struct ArchiveConfig {
    /// Scheme and host, without a trailing slash
    pub base_url: String,
    /// Per-attempt timeout for metadata requests
    pub timeout: Duration,
    /// Backoff for metadata requests. Binary downloads never retry.
    pub retry_policy: RetryPolicy,
}

impl ArchiveConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ArchiveError::InvalidConfig(format!(
                "base URL must be http(s): {}",
                self.base_url
            )));
        }
        if self.timeout.is_zero() {
            return Err(ArchiveError::InvalidConfig(
                "metadata timeout must be non-zero".to_string(),
            ));
        }
        if self.retry_policy.max_attempts == 0 {
            return Err(ArchiveError::InvalidConfig(
                "retry policy needs at least one attempt".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_METADATA_TIMEOUT,
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// Item metadata reduced to what the offline subsystem needs.
#[derive(Debug, Clone)]
pub struct ItemDetails {
    pub item_id: String,
    pub title: Option<String>,
    pub creator: Option<String>,
    pub files: Vec<ArchiveFile>,
}

impl ItemDetails {
    /// Audio files ordered by track number; untracked files follow in
    /// document order.
    pub fn audio_files(&self) -> Vec<&ArchiveFile> {
        let mut audio: Vec<&ArchiveFile> = self.files.iter().filter(|f| f.is_audio()).collect();
        audio.sort_by_key(|f| f.track.unwrap_or(u32::MAX));
        audio
    }

    pub fn file(&self, name: &str) -> Option<&ArchiveFile> {
        self.files.iter().find(|f| f.name == name)
    }
}

/// Archive metadata client
///
/// # Example
///
/// ```ignore
/// use provider_archive::{ArchiveClient, ArchiveConfig};
///
/// let client = ArchiveClient::new(http_client, ArchiveConfig::default());
/// let details = client.fetch_metadata("some-lecture-series").await?;
/// for file in details.audio_files() {
///     println!("{}", client.download_url(&details.item_id, &file.name));
/// }
/// ```
pub struct ArchiveClient {
    http_client: Arc<dyn HttpClient>,
    config: ArchiveConfig,
}

impl ArchiveClient {
    pub fn new(http_client: Arc<dyn HttpClient>, config: ArchiveConfig) -> Self {
        Self {
            http_client,
            config,
        }
    }

    pub fn config(&self) -> &ArchiveConfig {
        &self.config
    }

    pub fn metadata_url(&self, item_id: &str) -> String {
        format!(
            "{}/metadata/{}",
            self.config.base_url,
            urlencoding::encode(item_id)
        )
    }

    /// `{base}/download/{item_id}/{file_name}`. Each path segment of the file
    /// name is encoded separately so nested files keep their slashes.
    pub fn download_url(&self, item_id: &str, file_name: &str) -> String {
        let file_path = file_name
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");

        format!(
            "{}/download/{}/{}",
            self.config.base_url,
            urlencoding::encode(item_id),
            file_path
        )
    }

    /// Fetch and parse `{base}/metadata/{item_id}`.
    ///
    /// Transient failures are retried by the HTTP bridge according to the
    /// configured [`RetryPolicy`]. The endpoint answers unknown items with an
    /// empty object, which is reported as [`ArchiveError::ItemNotFound`].
    #[instrument(skip(self), fields(item_id = %item_id))]
    pub async fn fetch_metadata(&self, item_id: &str) -> Result<ItemDetails> {
        if item_id.trim().is_empty() {
            return Err(ArchiveError::ItemNotFound {
                item_id: item_id.to_string(),
            });
        }

        let request = HttpRequest::get(self.metadata_url(item_id))
            .header("Accept", "application/json")
            .timeout(self.config.timeout);

        let response = self
            .http_client
            .execute_with_retry(request, self.config.retry_policy.clone())
            .await?;
        let response = Self::check_status(item_id, response)?;

        let parsed: MetadataResponse = serde_json::from_slice(&response.body).map_err(|e| {
            ArchiveError::ParseError(format!("Failed to parse metadata for {}: {}", item_id, e))
        })?;

        if parsed.files.is_empty() && parsed.metadata.identifier.is_none() {
            debug!("Empty metadata document");
            return Err(ArchiveError::ItemNotFound {
                item_id: item_id.to_string(),
            });
        }

        info!(files = parsed.files.len(), "Fetched item metadata");

        Ok(ItemDetails {
            item_id: parsed
                .metadata
                .identifier
                .unwrap_or_else(|| item_id.to_string()),
            title: parsed.metadata.title,
            creator: parsed.metadata.creator,
            files: parsed.files,
        })
    }

    fn check_status(item_id: &str, response: HttpResponse) -> Result<HttpResponse> {
        if response.is_success() {
            return Ok(response);
        }

        warn!(status = response.status, "Metadata request failed");
        if response.status == 404 {
            return Err(ArchiveError::ItemNotFound {
                item_id: item_id.to_string(),
            });
        }
        Err(ArchiveError::ApiError {
            status_code: response.status,
            message: String::from_utf8_lossy(&response.body).to_string(),
        })
    }
}
