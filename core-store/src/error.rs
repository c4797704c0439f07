use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage quota exceeded: needed {needed} bytes, {available} available")]
    QuotaExceeded { needed: u64, available: u64 },

    #[error("Corrupt record for {id}: {detail}")]
    Corrupt { id: String, detail: String },

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether the failure is a capacity problem rather than a broken store.
    ///
    /// Quota failures are expected under storage pressure and are handled by
    /// eviction; everything else indicates the store itself misbehaved.
    pub fn is_quota(&self) -> bool {
        matches!(self, StoreError::QuotaExceeded { .. })
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
