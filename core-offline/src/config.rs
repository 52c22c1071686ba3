//! Offline manager configuration

use std::time::Duration;

const MIB: u64 = 1024 * 1024;

/// Configuration for the download queue and the storage budget.
#[derive(Debug, Clone)]
pub struct OfflineConfig {
    /// Hard cap on simultaneous transfers (default: 2)
    pub max_concurrent_downloads: usize,

    /// Headroom kept free beyond each admitted download (default: 50MiB)
    pub storage_buffer_bytes: u64,

    /// Longest gap between progress checkpoints (default: 5s)
    pub progress_persist_interval: Duration,

    /// Checkpoint at least every this many received chunks (default: 8)
    pub progress_persist_chunks: u32,

    /// Upper bound on the quota, applied even when the host reports a larger
    /// one (default: 500MiB)
    pub storage_quota_bytes: u64,

    /// Per-attempt timeout for metadata lookups (default: 15s)
    pub metadata_timeout: Duration,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: 2,
            storage_buffer_bytes: 50 * MIB,
            progress_persist_interval: Duration::from_secs(5),
            progress_persist_chunks: 8,
            storage_quota_bytes: 500 * MIB,
            metadata_timeout: Duration::from_secs(15),
        }
    }
}

impl OfflineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_concurrent_downloads(mut self, count: usize) -> Self {
        self.max_concurrent_downloads = count;
        self
    }

    pub fn with_storage_buffer(mut self, bytes: u64) -> Self {
        self.storage_buffer_bytes = bytes;
        self
    }

    pub fn with_storage_quota(mut self, bytes: u64) -> Self {
        self.storage_quota_bytes = bytes;
        self
    }

    pub fn with_progress_persist_interval(mut self, interval: Duration) -> Self {
        self.progress_persist_interval = interval;
        self
    }

    pub fn with_progress_persist_chunks(mut self, chunks: u32) -> Self {
        self.progress_persist_chunks = chunks;
        self
    }

    pub fn with_metadata_timeout(mut self, timeout: Duration) -> Self {
        self.metadata_timeout = timeout;
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrent_downloads == 0 {
            return Err("max_concurrent_downloads must be at least 1".to_string());
        }

        if self.storage_quota_bytes == 0 {
            return Err("storage_quota_bytes must be greater than 0".to_string());
        }

        if self.storage_buffer_bytes >= self.storage_quota_bytes {
            return Err(format!(
                "storage_buffer_bytes ({}) must be smaller than storage_quota_bytes ({})",
                self.storage_buffer_bytes, self.storage_quota_bytes
            ));
        }

        if self.progress_persist_chunks == 0 {
            return Err("progress_persist_chunks must be at least 1".to_string());
        }

        if self.progress_persist_interval.is_zero() {
            return Err("progress_persist_interval must be non-zero".to_string());
        }

        if self.metadata_timeout.is_zero() {
            return Err("metadata_timeout must be non-zero".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OfflineConfig::default();
        assert_eq!(config.max_concurrent_downloads, 2);
        assert_eq!(config.storage_buffer_bytes, 50 * MIB);
        assert_eq!(config.progress_persist_interval, Duration::from_secs(5));
        assert_eq!(config.progress_persist_chunks, 8);
        assert_eq!(config.storage_quota_bytes, 500 * MIB);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = OfflineConfig::new()
            .with_max_concurrent_downloads(4)
            .with_storage_quota(100)
            .with_storage_buffer(10)
            .with_progress_persist_chunks(1);

        assert_eq!(config.max_concurrent_downloads, 4);
        assert_eq!(config.storage_quota_bytes, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_config() {
        assert!(OfflineConfig::new()
            .with_max_concurrent_downloads(0)
            .validate()
            .is_err());
        assert!(OfflineConfig::new()
            .with_storage_quota(10)
            .with_storage_buffer(10)
            .validate()
            .is_err());
        assert!(OfflineConfig::new()
            .with_progress_persist_chunks(0)
            .validate()
            .is_err());
        assert!(OfflineConfig::new()
            .with_progress_persist_interval(Duration::ZERO)
            .validate()
            .is_err());
    }
}
