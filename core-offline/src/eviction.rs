//! Least-recently-used eviction
//!
//! Selection is a pure function over blob metadata; deleting the chosen
//! blobs and their tasks is left to `OfflineStore::evict`.

use core_store::{BlobInfo, ItemId};

/// Choose the least recently accessed items whose combined size reaches
/// `target_bytes`.
///
/// Ties in `last_accessed_at` keep their input order. Returns the whole
/// inventory when it is smaller than the target, and nothing for a zero
/// target.
pub fn select_for_eviction(blobs: &[BlobInfo], target_bytes: u64) -> Vec<ItemId> {
    if target_bytes == 0 {
        return Vec::new();
    }

    let mut by_recency: Vec<&BlobInfo> = blobs.iter().collect();
    // stable
    by_recency.sort_by_key(|blob| blob.last_accessed_at);

    let mut selected = Vec::new();
    let mut freed = 0u64;
    for blob in by_recency {
        if freed >= target_bytes {
            break;
        }
        freed = freed.saturating_add(blob.byte_size);
        selected.push(blob.item_id.clone());
    }
    selected
}
