//! Core service façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (HTTP, storage
//! estimation, clock) into the offline core. Desktop apps typically enable the
//! `desktop-shims` feature so `CoreConfig` can fall back to the reqwest client
//! and the on-disk usage estimator.
//!
//! ```ignore
//! use core_offline::OfflineConfig;
//! use core_runtime::config::CoreConfig;
//! use core_service::{MediaSource, OfflineLibrary};
//!
//! let config = CoreConfig::builder().database_path("offline.db").build()?;
//! let library = OfflineLibrary::bootstrap(config, OfflineConfig::default()).await?;
//!
//! library.download_item("lecture-series-01", None).await?;
//! match library.cached_or_stream_url("lecture-series-01", None).await? {
//!     MediaSource::Cached(bytes) => play_bytes(bytes),
//!     MediaSource::Stream(url) => play_url(url),
//! }
//! ```

pub mod error;

pub use error::{CoreError, Result};

use bytes::Bytes;
use core_offline::{
    DownloadQueueManager, EnqueueOutcome, HttpFetcher, OfflineConfig, OfflineItem, PlaybackCache,
};
use core_runtime::config::CoreConfig;
use core_runtime::events::{EventBus, EventStream};
use core_store::{
    create_pool, DatabaseConfig, ItemId, OfflineStore, SqliteOfflineStore, TaskStatus,
};
use provider_archive::{ArchiveClient, ArchiveConfig, ArchiveFile, ItemDetails};
use std::sync::Arc;
use tracing::{info, instrument};

/// Where the player should read an item from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    /// Payload available offline
    Cached(Bytes),
    /// Not cached; stream from this URL
    Stream(String),
}

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct OfflineLibrary {
    events: Arc<EventBus>,
    archive: Arc<ArchiveClient>,
    downloads: DownloadQueueManager,
    playback: PlaybackCache,
}

impl OfflineLibrary {
    /// Open the SQLite store named by `config`, wire the collaborators and
    /// recover the download queue.
    ///
    /// # Errors
    ///
    /// Fails if either config is invalid, the database cannot be opened or
    /// migrated, or recovery cannot read the queue.
    #[instrument(skip_all, fields(database = %config.database_path.display()))]
    pub async fn bootstrap(config: CoreConfig, offline: OfflineConfig) -> Result<Self> {
        config.validate()?;

        let pool = create_pool(DatabaseConfig::new(&config.database_path)).await?;
        let store: Arc<dyn OfflineStore> = Arc::new(
            SqliteOfflineStore::new(pool, config.clock.clone())
                .with_estimator(config.storage_estimator.clone()),
        );

        let library = Self::with_store(config, offline, store)?;
        let report = library.downloads.initialize().await?;
        info!(
            requeued = report.requeued.len(),
            repaired = report.repaired.len(),
            "Offline library ready"
        );
        Ok(library)
    }

    /// Wire the collaborators around an existing store. Nothing is recovered
    /// or started; call `downloads().initialize()` when ready.
    pub fn with_store(
        config: CoreConfig,
        offline: OfflineConfig,
        store: Arc<dyn OfflineStore>,
    ) -> Result<Self> {
        let archive_config = ArchiveConfig::new(config.archive_base_url.clone())
            .with_timeout(offline.metadata_timeout);
        archive_config.validate()?;

        let events = Arc::new(EventBus::new(config.event_buffer_size));
        let fetcher = Arc::new(HttpFetcher::new(config.http_client.clone()));
        let archive = Arc::new(ArchiveClient::new(config.http_client.clone(), archive_config));

        let downloads = DownloadQueueManager::new(
            offline,
            store.clone(),
            fetcher,
            events.clone(),
            config.clock.clone(),
        )?;
        let playback = PlaybackCache::new(store, events.clone(), config.clock.clone());

        Ok(Self {
            events,
            archive,
            downloads,
            playback,
        })
    }

    pub fn downloads(&self) -> &DownloadQueueManager {
        &self.downloads
    }

    pub fn playback(&self) -> &PlaybackCache {
        &self.playback
    }

    pub fn archive(&self) -> &ArchiveClient {
        &self.archive
    }

    /// Key of one file of an archive item in the offline store. Items hold
    /// several files, so each file is downloaded and cached on its own.
    pub fn offline_id(item_id: &str, file_name: &str) -> ItemId {
        ItemId::new(format!("{}/{}", item_id, file_name))
    }

    /// Every event published by the core.
    pub fn events(&self) -> EventStream {
        EventStream::new(self.events.subscribe())
    }

    /// Look the item up and queue one of its audio files.
    ///
    /// Without `file_name` the first audio file in track order is used.
    #[instrument(skip(self), fields(item_id = %item_id))]
    pub async fn download_item(
        &self,
        item_id: &str,
        file_name: Option<&str>,
    ) -> Result<EnqueueOutcome> {
        let details = self.archive.fetch_metadata(item_id).await?;
        let file = Self::pick_file(&details, file_name)?;

        let item = OfflineItem::new(
            Self::offline_id(item_id, &file.name),
            self.archive.download_url(item_id, &file.name),
            file.size.unwrap_or(0),
        )
        .with_file_name(file.name.clone());

        Ok(self.downloads.enqueue(item).await?)
    }

    /// Cached payload if present, otherwise the URL to stream from.
    ///
    /// Without `file_name`, any cached file of the item is served (lowest
    /// file name first) so playback works offline; if none is cached, the
    /// metadata is looked up and the first audio file in track order is
    /// streamed.
    pub async fn cached_or_stream_url(
        &self,
        item_id: &str,
        file_name: Option<&str>,
    ) -> Result<MediaSource> {
        if let Some(name) = file_name {
            let key = Self::offline_id(item_id, name);
            if let Some(bytes) = self.playback.get_cached_bytes(&key).await? {
                return Ok(MediaSource::Cached(bytes));
            }
            return Ok(MediaSource::Stream(self.archive.download_url(item_id, name)));
        }

        if let Some(bytes) = self.any_cached_file(item_id).await? {
            return Ok(MediaSource::Cached(bytes));
        }
        let details = self.archive.fetch_metadata(item_id).await?;
        let file = Self::pick_file(&details, None)?;
        Ok(MediaSource::Stream(
            self.archive.download_url(item_id, &file.name),
        ))
    }

    async fn any_cached_file(&self, item_id: &str) -> Result<Option<Bytes>> {
        let prefix = format!("{}/", item_id);
        let mut keys: Vec<ItemId> = self
            .downloads
            .tasks()
            .await?
            .into_iter()
            .filter(|task| {
                task.status == TaskStatus::Completed && task.item_id.as_str().starts_with(&prefix)
            })
            .map(|task| task.item_id)
            .collect();
        keys.sort_by(|a, b| a.as_str().cmp(b.as_str()));

        for key in keys {
            if let Some(bytes) = self.playback.get_cached_bytes(&key).await? {
                return Ok(Some(bytes));
            }
        }
        Ok(None)
    }

    fn pick_file<'a>(details: &'a ItemDetails, file_name: Option<&str>) -> Result<&'a ArchiveFile> {
        let file = match file_name {
            Some(name) => details.file(name),
            None => details.audio_files().into_iter().next(),
        };
        file.ok_or_else(|| CoreError::AudioFileNotFound {
            item_id: details.item_id.clone(),
            file_name: file_name.map(str::to_string),
        })
    }
}
