//! Storage budget reporting

use serde::{Deserialize, Serialize};

use core_store::PersistentStore;

use crate::error::Result;
use crate::index::CacheIndex;

/// Point-in-time storage usage, recomputed on every call and never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageBudget {
    /// Bytes of committed blobs (audio and images)
    pub used_bytes: u64,
    /// Platform-granted quota, when known
    pub quota_bytes: Option<u64>,
    /// Fully cached songs
    pub song_count: usize,
}

impl StorageBudget {
    /// Snapshot current usage from the store and index.
    pub async fn compute(store: &dyn PersistentStore, index: &CacheIndex) -> Result<Self> {
        Ok(Self {
            used_bytes: store.storage_size().await?,
            quota_bytes: store.quota_bytes().await?,
            song_count: index.cached_count(),
        })
    }

    /// Usage as a percentage of quota, `None` when quota is unknown.
    pub fn usage_percentage(&self) -> Option<f64> {
        match self.quota_bytes {
            Some(quota) if quota > 0 => Some((self.used_bytes as f64 / quota as f64) * 100.0),
            _ => None,
        }
    }

    /// Bytes left before the quota, `None` when quota is unknown.
    pub fn remaining_bytes(&self) -> Option<u64> {
        self.quota_bytes
            .map(|quota| quota.saturating_sub(self.used_bytes))
    }

    /// Whether usage is at or above 90% of a known quota.
    pub fn is_near_capacity(&self) -> bool {
        self.usage_percentage()
            .map(|pct| pct >= 90.0)
            .unwrap_or(false)
    }
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use core_store::{AlbumRef, CacheEntry, MemoryStore, Song, SongId};

    fn song(id: &str) -> Song {
        Song {
            id: SongId::new(id),
            title: "Title".to_string(),
            artists: vec!["Artist".to_string()],
            album: AlbumRef {
                id: "album-1".to_string(),
                name: "Album".to_string(),
            },
            images: vec![],
            downloads: vec![],
            duration_secs: 60,
        }
    }

    #[test]
    fn test_budget_helpers() {
        let budget = StorageBudget {
            used_bytes: 900,
            quota_bytes: Some(1000),
            song_count: 3,
        };
        assert_eq!(budget.usage_percentage(), Some(90.0));
        assert_eq!(budget.remaining_bytes(), Some(100));
        assert!(budget.is_near_capacity());

        let unknown = StorageBudget {
            used_bytes: 900,
            quota_bytes: None,
            song_count: 3,
        };
        assert_eq!(unknown.usage_percentage(), None);
        assert_eq!(unknown.remaining_bytes(), None);
        assert!(!unknown.is_near_capacity());
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1024), "1.0 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.0 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.0 GB");
    }

    #[tokio::test]
    async fn test_compute_reflects_store_and_index() {
        let store = MemoryStore::with_quota(10_000);
        let id = SongId::new("a");

        store
            .save_audio_blob(&id, Bytes::from(vec![0u8; 2500]))
            .await
            .unwrap();
        store
            .save_song(&CacheEntry::cached(song("a"), 100, 2500, "sha".to_string()))
            .await
            .unwrap();
        store
            .save_song(&CacheEntry::metadata_only(song("b"), 200))
            .await
            .unwrap();

        let index = CacheIndex::rebuild(&store).await.unwrap();
        let budget = StorageBudget::compute(&store, &index).await.unwrap();

        assert_eq!(budget.used_bytes, 2500);
        assert_eq!(budget.quota_bytes, Some(10_000));
        assert_eq!(budget.song_count, 1);
        assert_eq!(budget.usage_percentage(), Some(25.0));
    }
}
