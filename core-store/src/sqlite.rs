//! SQLite-backed [`OfflineStore`].

use crate::db::reclaim_space;
use crate::error::{Result, StoreError};
use crate::models::{
    BlobInfo, CachedBlob, DownloadTask, ItemId, PlaybackProgress, StorageEstimate, TaskStatus,
};
use crate::repository::OfflineStore;
use async_trait::async_trait;
use bridge_traits::storage::StorageEstimator;
use bridge_traits::time::Clock;
use bytes::Bytes;
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

const TASK_COLUMNS: &str = "item_id, status, progress_percent, bytes_transferred, total_bytes, \
     source_url, file_name, created_at, updated_at, started_at, completed_at, last_error";

/// Offline store persisted in the `downloads`, `audio_cache` and
/// `playback_progress` tables.
pub struct SqliteOfflineStore {
    pool: Pool<Sqlite>,
    clock: Arc<dyn Clock>,
    estimator: Option<Arc<dyn StorageEstimator>>,
}

impl SqliteOfflineStore {
    pub fn new(pool: Pool<Sqlite>, clock: Arc<dyn Clock>) -> Self {
        Self {
            pool,
            clock,
            estimator: None,
        }
    }

    /// Consult the host for usage and quota in [`OfflineStore::estimate`].
    pub fn with_estimator(mut self, estimator: Arc<dyn StorageEstimator>) -> Self {
        self.estimator = Some(estimator);
        self
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    fn row_to_task(row: &SqliteRow) -> Result<DownloadTask> {
        let item_id: String = row.try_get("item_id")?;
        let status: String = row.try_get("status")?;
        let status = status.parse::<TaskStatus>().map_err(|message| StoreError::Corrupt {
            item_id: item_id.clone(),
            message,
        })?;
        let progress: i64 = row.try_get("progress_percent")?;

        Ok(DownloadTask {
            item_id: ItemId::new(item_id),
            status,
            progress_percent: progress.clamp(0, 100) as u8,
            bytes_transferred: to_u64(row.try_get("bytes_transferred")?),
            total_bytes: row.try_get::<Option<i64>, _>("total_bytes")?.map(to_u64),
            source_url: row.try_get("source_url")?,
            file_name: row.try_get("file_name")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            last_error: row.try_get("last_error")?,
        })
    }

    fn row_to_blob_info(row: &SqliteRow) -> Result<BlobInfo> {
        Ok(BlobInfo {
            item_id: ItemId::new(row.try_get::<String, _>("item_id")?),
            byte_size: to_u64(row.try_get("byte_size")?),
            cached_at: row.try_get("cached_at")?,
            last_accessed_at: row.try_get("last_accessed_at")?,
        })
    }

    fn row_to_progress(row: &SqliteRow) -> Result<PlaybackProgress> {
        Ok(PlaybackProgress {
            item_id: ItemId::new(row.try_get::<String, _>("item_id")?),
            position_seconds: row.try_get("position_seconds")?,
            duration_seconds: row.try_get("duration_seconds")?,
            last_played_at: row.try_get("last_played_at")?,
            is_complete: row.try_get::<i64, _>("is_complete")? != 0,
        })
    }

    async fn blob_bytes_total(&self) -> Result<u64> {
        let total: Option<i64> = sqlx::query_scalar("SELECT SUM(byte_size) FROM audio_cache")
            .fetch_one(&self.pool)
            .await?;
        Ok(total.map(to_u64).unwrap_or(0))
    }
}

fn to_u64(value: i64) -> u64 {
    value.max(0) as u64
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[async_trait]
impl OfflineStore for SqliteOfflineStore {
    async fn get_task(&self, item_id: &ItemId) -> Result<Option<DownloadTask>> {
        let sql = format!("SELECT {} FROM downloads WHERE item_id = ?", TASK_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(item_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_task).transpose()
    }

    #[instrument(skip(self, task), fields(item_id = %task.item_id, status = %task.status))]
    async fn put_task(&self, task: &DownloadTask) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO downloads (
                item_id, status, progress_percent, bytes_transferred, total_bytes,
                source_url, file_name, created_at, updated_at, started_at,
                completed_at, last_error
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(item_id) DO UPDATE SET
                status = excluded.status,
                progress_percent = excluded.progress_percent,
                bytes_transferred = excluded.bytes_transferred,
                total_bytes = excluded.total_bytes,
                source_url = excluded.source_url,
                file_name = excluded.file_name,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at,
                started_at = excluded.started_at,
                completed_at = excluded.completed_at,
                last_error = excluded.last_error
            "#,
        )
        .bind(task.item_id.as_str())
        .bind(task.status.as_str())
        .bind(i64::from(task.progress_percent))
        .bind(to_i64(task.bytes_transferred))
        .bind(task.total_bytes.map(to_i64))
        .bind(task.source_url.as_deref())
        .bind(task.file_name.as_deref())
        .bind(task.created_at)
        .bind(task.updated_at)
        .bind(task.started_at)
        .bind(task.completed_at)
        .bind(task.last_error.as_deref())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_task(&self, item_id: &ItemId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM downloads WHERE item_id = ?")
            .bind(item_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn all_tasks(&self) -> Result<Vec<DownloadTask>> {
        let sql = format!(
            "SELECT {} FROM downloads ORDER BY created_at ASC, rowid ASC",
            TASK_COLUMNS
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    async fn tasks_by_status(&self, status: TaskStatus) -> Result<Vec<DownloadTask>> {
        let sql = format!(
            "SELECT {} FROM downloads WHERE status = ? ORDER BY created_at ASC, rowid ASC",
            TASK_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    #[instrument(skip(self, blob), fields(item_id = %blob.item_id, bytes = blob.byte_size))]
    async fn put_blob(&self, blob: &CachedBlob) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO audio_cache (item_id, data, byte_size, mime_type, cached_at, last_accessed_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(item_id) DO UPDATE SET
                data = excluded.data,
                byte_size = excluded.byte_size,
                mime_type = excluded.mime_type,
                cached_at = excluded.cached_at,
                last_accessed_at = excluded.last_accessed_at
            "#,
        )
        .bind(blob.item_id.as_str())
        .bind(blob.bytes.as_ref())
        .bind(to_i64(blob.byte_size))
        .bind(blob.mime_type.as_deref())
        .bind(blob.cached_at)
        .bind(blob.last_accessed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn read_blob(&self, item_id: &ItemId) -> Result<Option<CachedBlob>> {
        let now = self.clock.unix_timestamp_millis();
        let mut tx = self.pool.begin().await?;

        let touched = sqlx::query("UPDATE audio_cache SET last_accessed_at = ? WHERE item_id = ?")
            .bind(now)
            .bind(item_id.as_str())
            .execute(&mut *tx)
            .await?;

        if touched.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let row = sqlx::query(
            "SELECT item_id, data, byte_size, mime_type, cached_at, last_accessed_at \
             FROM audio_cache WHERE item_id = ?",
        )
        .bind(item_id.as_str())
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        let data: Vec<u8> = row.try_get("data")?;
        Ok(Some(CachedBlob {
            item_id: item_id.clone(),
            bytes: Bytes::from(data),
            byte_size: to_u64(row.try_get("byte_size")?),
            mime_type: row.try_get("mime_type")?,
            cached_at: row.try_get("cached_at")?,
            last_accessed_at: row.try_get("last_accessed_at")?,
        }))
    }

    async fn has_blob(&self, item_id: &ItemId) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM audio_cache WHERE item_id = ?")
            .bind(item_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    async fn blob_infos(&self) -> Result<Vec<BlobInfo>> {
        let rows = sqlx::query(
            "SELECT item_id, byte_size, cached_at, last_accessed_at FROM audio_cache \
             ORDER BY last_accessed_at ASC, rowid ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_blob_info).collect()
    }

    async fn delete_blob(&self, item_id: &ItemId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM audio_cache WHERE item_id = ?")
            .bind(item_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, item_ids), fields(count = item_ids.len()))]
    async fn evict(&self, item_ids: &[ItemId]) -> Result<u64> {
        if item_ids.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut freed = 0u64;

        for item_id in item_ids {
            let size: Option<i64> =
                sqlx::query_scalar("SELECT byte_size FROM audio_cache WHERE item_id = ?")
                    .bind(item_id.as_str())
                    .fetch_optional(&mut *tx)
                    .await?;
            freed = freed.saturating_add(size.map(to_u64).unwrap_or(0));

            sqlx::query("DELETE FROM audio_cache WHERE item_id = ?")
                .bind(item_id.as_str())
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM downloads WHERE item_id = ?")
                .bind(item_id.as_str())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        debug!(freed_bytes = freed, "Evicted cached items");

        if freed > 0 {
            if let Err(e) = reclaim_space(&self.pool).await {
                warn!(error = %e, "Could not reclaim space after eviction");
            }
        }
        Ok(freed)
    }

    async fn save_progress(&self, progress: &PlaybackProgress) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO playback_progress (item_id, position_seconds, duration_seconds, last_played_at, is_complete)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(item_id) DO UPDATE SET
                position_seconds = excluded.position_seconds,
                duration_seconds = excluded.duration_seconds,
                last_played_at = excluded.last_played_at,
                is_complete = excluded.is_complete
            "#,
        )
        .bind(progress.item_id.as_str())
        .bind(progress.position_seconds)
        .bind(progress.duration_seconds)
        .bind(progress.last_played_at)
        .bind(i64::from(progress.is_complete))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_progress(&self, item_id: &ItemId) -> Result<Option<PlaybackProgress>> {
        let row = sqlx::query(
            "SELECT item_id, position_seconds, duration_seconds, last_played_at, is_complete \
             FROM playback_progress WHERE item_id = ?",
        )
        .bind(item_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_progress).transpose()
    }

    async fn recent_progress(&self, limit: usize) -> Result<Vec<PlaybackProgress>> {
        let rows = sqlx::query(
            "SELECT item_id, position_seconds, duration_seconds, last_played_at, is_complete \
             FROM playback_progress ORDER BY last_played_at DESC LIMIT ?",
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_progress).collect()
    }

    async fn delete_progress(&self, item_id: &ItemId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM playback_progress WHERE item_id = ?")
            .bind(item_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Usage is the sum of cached payloads. The host contributes only its
    /// quota: its usage figure counts database pages that SQLite keeps after
    /// a delete, so it does not fall when items are evicted.
    async fn estimate(&self) -> Result<StorageEstimate> {
        let blob_bytes = self.blob_bytes_total().await?;

        let quota_bytes = match &self.estimator {
            Some(estimator) => match estimator.estimate().await {
                Ok(host) => host.quota_bytes,
                Err(e) => {
                    warn!(error = %e, "Host storage estimate failed; no host quota applied");
                    None
                }
            },
            None => None,
        };

        Ok(StorageEstimate {
            usage_bytes: blob_bytes,
            quota_bytes,
        })
    }
}
