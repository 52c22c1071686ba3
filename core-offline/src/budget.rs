//! Storage budget and usage statistics
//!
//! The budget combines what the store reports with the configured ceiling:
//! the effective quota is the smaller of the host quota and
//! `storage_quota_bytes`.

use core_store::StorageEstimate;
use serde::{Deserialize, Serialize};

/// Snapshot of how much room the offline cache has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageBudget {
    pub used_bytes: u64,
    pub available_bytes: u64,
    pub quota_bytes: u64,
}

impl StorageBudget {
    pub fn from_estimate(estimate: StorageEstimate, configured_quota: u64) -> Self {
        let quota_bytes = estimate
            .quota_bytes
            .map_or(configured_quota, |host| host.min(configured_quota));

        Self {
            used_bytes: estimate.usage_bytes,
            available_bytes: quota_bytes.saturating_sub(estimate.usage_bytes),
            quota_bytes,
        }
    }

    /// Whether `size` more bytes fit while keeping `buffer` bytes free.
    pub fn admits(&self, size: u64, buffer: u64) -> bool {
        self.available_bytes >= size.saturating_add(buffer)
    }

    /// Bytes that must be freed before `size` is admitted. Zero when it
    /// already fits.
    pub fn shortfall(&self, size: u64, buffer: u64) -> u64 {
        size.saturating_add(buffer)
            .saturating_sub(self.available_bytes)
    }
}

/// Statistics about the offline cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageStats {
    /// Bytes in use, including data outside the blob cache
    pub used_bytes: u64,

    pub available_bytes: u64,

    /// Effective quota
    pub quota_bytes: u64,

    /// Sum of cached blob sizes
    pub cached_bytes: u64,

    pub cached_items: usize,

    pub active_downloads: usize,

    pub pending_downloads: usize,

    pub failed_downloads: usize,
}

impl StorageStats {
    /// Usage as a percentage of the quota.
    pub fn usage_percentage(&self) -> f64 {
        if self.quota_bytes == 0 {
            return 0.0;
        }

        (self.used_bytes as f64 / self.quota_bytes as f64) * 100.0
    }

    /// Returns true if usage is above 90% of the quota.
    pub fn is_near_capacity(&self) -> bool {
        self.usage_percentage() > 90.0
    }

    /// Bytes to free before an item of `size` fits with `buffer` headroom.
    pub fn space_needed_for(&self, size: u64, buffer: u64) -> u64 {
        size.saturating_add(buffer)
            .saturating_sub(self.available_bytes)
    }
}
