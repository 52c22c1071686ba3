//! Playback-facing cache access
//!
//! The playback engine asks whether an item is available offline, reads its
//! bytes, and reports listening positions. Reads refresh the item's recency
//! so eviction follows actual listening.

use crate::error::Result;
use bridge_traits::time::Clock;
use bytes::Bytes;
use core_runtime::events::{CoreEvent, EventBus, PlaybackEvent};
use core_store::{ItemId, OfflineStore, PlaybackProgress};
use std::sync::Arc;
use tracing::{debug, instrument};

#[derive(Clone)]
pub struct PlaybackCache {
    store: Arc<dyn OfflineStore>,
    events: Arc<EventBus>,
    clock: Arc<dyn Clock>,
}

impl PlaybackCache {
    pub fn new(store: Arc<dyn OfflineStore>, events: Arc<EventBus>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            events,
            clock,
        }
    }

    /// Existence check; does not count as an access.
    pub async fn is_cached(&self, item_id: &ItemId) -> Result<bool> {
        Ok(self.store.has_blob(item_id).await?)
    }

    /// Playable bytes, if cached. Counts as an access for eviction.
    #[instrument(skip(self), fields(item_id = %item_id))]
    pub async fn get_cached_bytes(&self, item_id: &ItemId) -> Result<Option<Bytes>> {
        let blob = self.store.read_blob(item_id).await?;
        if blob.is_none() {
            debug!("Cache miss");
        }
        Ok(blob.map(|blob| blob.bytes))
    }

    /// Record a listening position. Near the end the item is marked
    /// complete.
    #[instrument(skip(self), fields(item_id = %item_id))]
    pub async fn save_position(
        &self,
        item_id: &ItemId,
        position_seconds: f64,
        duration_seconds: f64,
    ) -> Result<PlaybackProgress> {
        let progress = PlaybackProgress::new(
            item_id.clone(),
            position_seconds,
            duration_seconds,
            self.clock.unix_timestamp_millis(),
        );
        self.store.save_progress(&progress).await?;

        self.events
            .emit(CoreEvent::Playback(PlaybackEvent::PositionSaved {
                item_id: item_id.to_string(),
                position_ms: (progress.position_seconds * 1000.0) as u64,
                duration_ms: (progress.duration_seconds * 1000.0) as u64,
                is_complete: progress.is_complete,
            }))
            .ok();

        Ok(progress)
    }

    pub async fn get_position(&self, item_id: &ItemId) -> Result<Option<PlaybackProgress>> {
        Ok(self.store.get_progress(item_id).await?)
    }

    /// Most recently played first.
    pub async fn recently_played(&self, limit: usize) -> Result<Vec<PlaybackProgress>> {
        Ok(self.store.recent_progress(limit).await?)
    }

    /// Returns `true` if a position was stored.
    pub async fn clear_position(&self, item_id: &ItemId) -> Result<bool> {
        Ok(self.store.delete_progress(item_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::time::ManualClock;
    use core_store::{CachedBlob, InMemoryStore};

    fn setup() -> (PlaybackCache, Arc<InMemoryStore>, Arc<ManualClock>, Arc<EventBus>) {
        let clock = Arc::new(ManualClock::new(1_000));
        let store = Arc::new(InMemoryStore::new(clock.clone()));
        let events = Arc::new(EventBus::new(16));
        let cache = PlaybackCache::new(store.clone(), events.clone(), clock.clone());
        (cache, store, clock, events)
    }

    #[core_async::test]
    async fn test_cached_bytes_touch_recency() {
        let (cache, store, clock, _) = setup();
        let id = ItemId::new("talk");
        store
            .put_blob(&CachedBlob::new(id.clone(), Bytes::from_static(b"mp3"), None, 1_000))
            .await
            .unwrap();

        assert!(cache.is_cached(&id).await.unwrap());
        clock.set_millis(5_000);
        let bytes = cache.get_cached_bytes(&id).await.unwrap().unwrap();

        assert_eq!(&bytes[..], b"mp3");
        let info = &store.blob_infos().await.unwrap()[0];
        assert_eq!(info.last_accessed_at, 5_000);
        assert!(cache.get_cached_bytes(&ItemId::new("other")).await.unwrap().is_none());
    }

    #[core_async::test]
    async fn test_save_position_marks_completion_and_emits() {
        let (cache, _, _, events) = setup();
        let mut rx = events.subscribe();
        let id = ItemId::new("talk");

        let progress = cache.save_position(&id, 30.0, 600.0).await.unwrap();
        assert!(!progress.is_complete);

        let progress = cache.save_position(&id, 597.0, 600.0).await.unwrap();
        assert!(progress.is_complete);
        assert_eq!(cache.get_position(&id).await.unwrap(), Some(progress));

        let first = rx.recv().await.unwrap();
        assert!(matches!(
            first,
            CoreEvent::Playback(PlaybackEvent::PositionSaved { position_ms: 30_000, is_complete: false, .. })
        ));
    }

    #[core_async::test]
    async fn test_recently_played_and_clear() {
        let (cache, _, clock, _) = setup();
        for (i, id) in ["a", "b", "c"].iter().enumerate() {
            clock.set_millis(1_000 + i as i64);
            cache.save_position(&ItemId::new(*id), 1.0, 100.0).await.unwrap();
        }

        let recent: Vec<String> = cache
            .recently_played(2)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.item_id.to_string())
            .collect();
        assert_eq!(recent, vec!["c", "b"]);

        assert!(cache.clear_position(&ItemId::new("c")).await.unwrap());
        assert!(!cache.clear_position(&ItemId::new("c")).await.unwrap());
    }
}
