//! Storage estimation for desktop hosts.
//!
//! Desktop hosts have no origin quota, so usage is measured by walking the
//! application data directory and the quota is whatever the embedder
//! configured (or unknown).

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::{HostStorageEstimate, StorageEstimator},
};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Measures the bytes under a directory tree.
pub struct DiskUsageEstimator {
    root: PathBuf,
    quota_bytes: Option<u64>,
}

impl DiskUsageEstimator {
    /// Estimator over the platform data directory.
    pub fn new() -> Self {
        let root = dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("archive-offline-core");
        Self::with_root(root)
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            quota_bytes: None,
        }
    }

    pub fn with_quota(mut self, quota_bytes: u64) -> Self {
        self.quota_bytes = Some(quota_bytes);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn directory_size(root: &Path) -> Result<u64> {
        let mut total = 0u64;
        let mut pending = vec![root.to_path_buf()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(BridgeError::Io(e)),
            };

            while let Some(entry) = entries.next_entry().await? {
                let metadata = entry.metadata().await?;
                if metadata.is_dir() {
                    pending.push(entry.path());
                } else {
                    total = total.saturating_add(metadata.len());
                }
            }
        }

        Ok(total)
    }
}

impl Default for DiskUsageEstimator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageEstimator for DiskUsageEstimator {
    async fn estimate(&self) -> Result<HostStorageEstimate> {
        let usage = Self::directory_size(&self.root).await?;
        debug!(path = ?self.root, usage_bytes = usage, "Measured data directory");

        Ok(HostStorageEstimate {
            usage_bytes: Some(usage),
            quota_bytes: self.quota_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_directory_counts_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let estimator = DiskUsageEstimator::with_root(dir.path().join("absent"));

        let estimate = estimator.estimate().await.unwrap();
        assert_eq!(estimate.usage_bytes, Some(0));
        assert_eq!(estimate.quota_bytes, None);
    }

    #[tokio::test]
    async fn test_nested_files_are_summed() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("a.bin"), vec![0u8; 100])
            .await
            .unwrap();
        tokio::fs::create_dir(dir.path().join("nested")).await.unwrap();
        tokio::fs::write(dir.path().join("nested").join("b.bin"), vec![0u8; 28])
            .await
            .unwrap();

        let estimator = DiskUsageEstimator::with_root(dir.path()).with_quota(1_000);
        let estimate = estimator.estimate().await.unwrap();

        assert_eq!(estimate.usage_bytes, Some(128));
        assert_eq!(estimate.remaining(), Some(872));
    }
}
