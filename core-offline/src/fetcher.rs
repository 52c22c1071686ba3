//! Remote fetcher
//!
//! Streams one item's payload into memory, reporting progress per chunk and
//! checking the cancellation token at every suspension point. Transfers
//! always start at byte zero and are never retried automatically.

use async_trait::async_trait;
use bridge_traits::error::BridgeError;
use bridge_traits::http::{HttpClient, HttpRequest};
use bytes::{Bytes, BytesMut};
use core_async::sync::CancellationToken;
use core_runtime::logging::redact_url;
use futures_util::StreamExt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Receives transfer progress. `total_bytes` is `None` until the server
/// advertises a length.
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    async fn on_progress(&self, bytes_transferred: u64, total_bytes: Option<u64>);
}

/// A complete payload.
#[derive(Debug, Clone)]
pub struct FetchedPayload {
    pub bytes: Bytes,
    pub mime_type: Option<String>,
}

impl FetchedPayload {
    pub fn byte_size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The token was cancelled; not a failure.
    #[error("transfer cancelled")]
    Cancelled,

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid source: {0}")]
    InvalidSource(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl From<BridgeError> for FetchError {
    fn from(error: BridgeError) -> Self {
        match error {
            BridgeError::InvalidUrl(msg) => FetchError::InvalidSource(msg),
            BridgeError::Http { status: 404, message } | BridgeError::Http { status: 410, message } => {
                FetchError::NotFound(message)
            }
            other => FetchError::Network(other.to_string()),
        }
    }
}

#[async_trait]
pub trait RemoteFetcher: Send + Sync {
    /// Fetch `source` in full.
    ///
    /// # Errors
    ///
    /// [`FetchError::Cancelled`] once `cancel` fires; any other variant is a
    /// real failure.
    async fn fetch_with_progress(
        &self,
        source: &str,
        reporter: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<FetchedPayload, FetchError>;
}

/// [`RemoteFetcher`] over the host HTTP bridge.
pub struct HttpFetcher {
    http_client: Arc<dyn HttpClient>,
}

impl HttpFetcher {
    pub fn new(http_client: Arc<dyn HttpClient>) -> Self {
        Self { http_client }
    }

    fn validate_source(source: &str) -> Result<(), FetchError> {
        if source.starts_with("http://") || source.starts_with("https://") {
            Ok(())
        } else {
            Err(FetchError::InvalidSource(source.to_string()))
        }
    }
}

#[async_trait]
impl RemoteFetcher for HttpFetcher {
    #[instrument(skip(self, reporter, cancel), fields(source = %redact_url(source)))]
    async fn fetch_with_progress(
        &self,
        source: &str,
        reporter: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<FetchedPayload, FetchError> {
        Self::validate_source(source)?;
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let request = HttpRequest::get(source).range_from(0);
        let response = core_async::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            response = self.http_client.download_stream(request) => response?,
        };

        match response.status {
            404 | 410 => return Err(FetchError::NotFound(source.to_string())),
            status if !(200..300).contains(&status) => {
                warn!(status, "Download rejected");
                return Err(FetchError::Network(format!("HTTP {} from {}", status, source)));
            }
            _ => {}
        }

        let total = response.content_length.filter(|len| *len > 0);
        let mime_type = response.content_type().map(str::to_string);
        let mut body = response.body;
        let mut buffer = BytesMut::with_capacity(total.unwrap_or(0).min(64 * 1024 * 1024) as usize);

        reporter.on_progress(0, total).await;

        loop {
            let chunk = core_async::select! {
                biased;
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                chunk = body.next() => chunk,
            };

            match chunk {
                Some(Ok(bytes)) => {
                    buffer.extend_from_slice(&bytes);
                    reporter.on_progress(buffer.len() as u64, total).await;
                }
                Some(Err(e)) => return Err(FetchError::Network(e.to_string())),
                None => break,
            }
        }

        if let Some(expected) = total {
            if (buffer.len() as u64) < expected {
                return Err(FetchError::Network(format!(
                    "stream ended after {} of {} bytes",
                    buffer.len(),
                    expected
                )));
            }
        }

        debug!(bytes = buffer.len(), "Transfer finished");
        Ok(FetchedPayload {
            bytes: buffer.freeze(),
            mime_type,
        })
    }
}
