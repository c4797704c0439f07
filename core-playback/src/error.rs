//! # Playback Error Types
//!
//! Errors for source resolution and offline mode. The resolver's public
//! surface degrades to [`ResolvedSource::Unavailable`](crate::resolver::ResolvedSource)
//! instead of erroring; these types cover the operations that do fail.

use thiserror::Error;

/// Errors that can occur in the playback source layer.
#[derive(Error, Debug)]
pub enum PlaybackError {
    /// No playable source exists for the song right now.
    #[error("Audio source unavailable: {0}")]
    SourceUnavailable(String),

    /// Persistent store failed while reading a cached source.
    #[error("Store error: {0}")]
    Store(#[from] core_store::StoreError),

    /// Platform bridge failed, e.g. the reachability monitor.
    #[error("Network error: {0}")]
    Network(#[from] bridge_traits::BridgeError),
}

impl PlaybackError {
    /// Returns `true` if this error is transient and the operation can be retried.
    pub fn is_transient(&self) -> bool {
        match self {
            PlaybackError::SourceUnavailable(_) => true,
            PlaybackError::Store(_) => false,
            PlaybackError::Network(e) => e.is_transient(),
        }
    }
}

/// Result type for playback operations.
pub type Result<T> = std::result::Result<T, PlaybackError>;

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::BridgeError;

    #[test]
    fn test_transient_classification() {
        assert!(PlaybackError::SourceUnavailable("song x".to_string()).is_transient());
        assert!(
            PlaybackError::Network(BridgeError::Connect("reset".to_string())).is_transient()
        );
        assert!(!PlaybackError::Store(core_store::StoreError::Unavailable(
            "closed".to_string()
        ))
        .is_transient());
    }
}
