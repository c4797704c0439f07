//! Cache configuration and policies

use core_store::Quality;
use std::time::Duration;

/// Configuration for the offline cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Eviction ceiling in bytes (default: 4GB)
    pub max_cache_size_bytes: u64,

    /// Quality label to match against a song's download variants; no exact
    /// match falls back to the last-listed variant
    pub preferred_quality: Quality,

    /// Total download attempts per song, including the first (default: 3).
    /// Set to 1 for no retry.
    pub max_retry_attempts: u32,

    /// Base delay before the second attempt; doubles per attempt
    pub retry_base_delay: Duration,

    /// Optional deadline per download attempt. `None` leaves timing to the
    /// HTTP layer (default).
    pub download_timeout: Option<Duration>,

    /// Verify the stored SHA-256 digest when serving cached audio (default: true)
    pub verify_integrity: bool,

    /// Fetch and persist artwork alongside audio, best-effort (default: true)
    pub download_images: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_cache_size_bytes: 4 * 1024 * 1024 * 1024, // 4GB
            preferred_quality: Quality::new("128kbps"),
            max_retry_attempts: 3,
            retry_base_delay: Duration::from_millis(100),
            download_timeout: None,
            verify_integrity: true,
            download_images: true,
        }
    }
}

impl CacheConfig {
    /// Create a new cache configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the eviction ceiling.
    pub fn with_max_size(mut self, bytes: u64) -> Self {
        self.max_cache_size_bytes = bytes;
        self
    }

    /// Set the preferred download quality.
    pub fn with_preferred_quality(mut self, quality: Quality) -> Self {
        self.preferred_quality = quality;
        self
    }

    /// Set the total attempt budget per download.
    pub fn with_max_retry_attempts(mut self, attempts: u32) -> Self {
        self.max_retry_attempts = attempts;
        self
    }

    /// Set the base retry delay.
    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    /// Set a per-attempt download deadline.
    pub fn with_download_timeout(mut self, timeout: Duration) -> Self {
        self.download_timeout = Some(timeout);
        self
    }

    /// Enable or disable read-path integrity verification.
    pub fn with_integrity_check(mut self, enabled: bool) -> Self {
        self.verify_integrity = enabled;
        self
    }

    /// Enable or disable artwork downloads.
    pub fn with_image_downloads(mut self, enabled: bool) -> Self {
        self.download_images = enabled;
        self
    }

    /// Delay before the given attempt number retries (attempt is 1-based;
    /// the first attempt has no delay).
    pub fn retry_delay_for(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        self.retry_base_delay * 2u32.saturating_pow(attempt - 2)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_cache_size_bytes == 0 {
            return Err("max_cache_size_bytes must be greater than 0".to_string());
        }

        if self.max_retry_attempts == 0 {
            return Err("max_retry_attempts must be at least 1".to_string());
        }

        if self.preferred_quality.as_str().is_empty() {
            return Err("preferred_quality cannot be empty".to_string());
        }

        Ok(())
    }
}
