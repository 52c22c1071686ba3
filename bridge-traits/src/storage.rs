//! Host Storage Accounting
//!
//! Browsers and sandboxed hosts expose an approximate quota and usage for the
//! origin. Native hosts usually have no quota at all. Both cases go through
//! [`StorageEstimator`]; a missing figure is `None`, never zero.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Snapshot reported by the host. Either field may be unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostStorageEstimate {
    pub usage_bytes: Option<u64>,
    pub quota_bytes: Option<u64>,
}

impl HostStorageEstimate {
    pub fn new(usage_bytes: Option<u64>, quota_bytes: Option<u64>) -> Self {
        Self {
            usage_bytes,
            quota_bytes,
        }
    }

    /// Bytes left under the host quota, when both figures are known.
    pub fn remaining(&self) -> Option<u64> {
        match (self.quota_bytes, self.usage_bytes) {
            (Some(quota), Some(usage)) => Some(quota.saturating_sub(usage)),
            _ => None,
        }
    }
}

/// Storage estimation capability.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::StorageEstimator;
///
/// async fn headroom(estimator: &dyn StorageEstimator) -> Option<u64> {
///     estimator.estimate().await.ok()?.remaining()
/// }
/// ```
#[async_trait]
pub trait StorageEstimator: Send + Sync {
    /// Query the host for its current usage and quota.
    async fn estimate(&self) -> Result<HostStorageEstimate>;
}

/// Estimator for hosts that expose no storage accounting.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnknownStorageEstimator;

#[async_trait]
impl StorageEstimator for UnknownStorageEstimator {
    async fn estimate(&self) -> Result<HostStorageEstimate> {
        Ok(HostStorageEstimate::default())
    }
}
