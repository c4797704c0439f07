//! Error types for the cache layer

use thiserror::Error;

/// Errors surfaced by the download pipeline, index, and evictor.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Durable storage failed underneath us
    #[error("Store error: {0}")]
    Store(#[from] core_store::StoreError),

    /// Network or host bridge failure
    #[error("Network error: {0}")]
    Network(#[from] bridge_traits::BridgeError),

    /// The song lists no download variants at all
    #[error("Song {0} has no download variants")]
    NoVariants(String),

    /// All download attempts were spent
    #[error("Download failed after {attempts} attempt(s): {message}")]
    DownloadFailed { attempts: u32, message: String },

    /// Configuration rejected by validation
    #[error("Invalid cache configuration: {0}")]
    Config(String),
}

impl CacheError {
    /// True when another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            CacheError::Network(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;
