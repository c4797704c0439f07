//! In-memory store
//!
//! Reference implementation of [`PersistentStore`]. Used as the injected
//! backend in tests and on hosts without durable storage; its behavior is
//! the semantic baseline the filesystem backend must match.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::{Result, StoreError};
use crate::models::{CacheEntry, Quality, SongId};
use crate::store::PersistentStore;

#[derive(Debug, Default)]
struct Inner {
    songs: HashMap<SongId, CacheEntry>,
    audio: HashMap<SongId, Bytes>,
    images: HashMap<(SongId, Quality), Bytes>,
}

impl Inner {
    /// Blob bytes currently held. Records are uncounted: used-bytes means
    /// committed blob payload, on every backend.
    fn used_bytes(&self) -> u64 {
        let audio: u64 = self.audio.values().map(|b| b.len() as u64).sum();
        let images: u64 = self.images.values().map(|b| b.len() as u64).sum();
        audio + images
    }
}

/// In-memory [`PersistentStore`] with an optional quota.
#[derive(Debug)]
pub struct MemoryStore {
    quota_bytes: Option<u64>,
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// Unbounded store.
    pub fn new() -> Self {
        Self {
            quota_bytes: None,
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Store that rejects blob writes once `quota_bytes` would be exceeded.
    pub fn with_quota(quota_bytes: u64) -> Self {
        Self {
            quota_bytes: Some(quota_bytes),
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Fails the write (leaving state untouched) when the projected usage
    /// after replacing `replaced` bytes with `incoming` overflows the quota.
    fn check_quota(&self, inner: &Inner, replaced: u64, incoming: u64) -> Result<()> {
        let Some(quota) = self.quota_bytes else {
            return Ok(());
        };
        let base = inner.used_bytes().saturating_sub(replaced);
        if base + incoming > quota {
            return Err(StoreError::QuotaExceeded {
                needed: incoming,
                available: quota.saturating_sub(base),
            });
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn save_song(&self, entry: &CacheEntry) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.songs.insert(entry.id().clone(), entry.clone());
        Ok(())
    }

    async fn song(&self, id: &SongId) -> Result<Option<CacheEntry>> {
        let inner = self.inner.read().await;
        Ok(inner.songs.get(id).cloned())
    }

    async fn all_songs(&self) -> Result<Vec<CacheEntry>> {
        let inner = self.inner.read().await;
        Ok(inner.songs.values().cloned().collect())
    }

    async fn save_audio_blob(&self, id: &SongId, blob: Bytes) -> Result<()> {
        let mut inner = self.inner.write().await;
        let replaced = inner.audio.get(id).map(|b| b.len() as u64).unwrap_or(0);
        self.check_quota(&inner, replaced, blob.len() as u64)?;
        inner.audio.insert(id.clone(), blob);
        Ok(())
    }

    async fn audio_blob(&self, id: &SongId) -> Result<Option<Bytes>> {
        let inner = self.inner.read().await;
        Ok(inner.audio.get(id).cloned())
    }

    async fn has_audio_blob(&self, id: &SongId) -> Result<bool> {
        let inner = self.inner.read().await;
        Ok(inner.audio.contains_key(id))
    }

    async fn save_image_blob(&self, id: &SongId, quality: &Quality, blob: Bytes) -> Result<()> {
        let mut inner = self.inner.write().await;
        let key = (id.clone(), quality.clone());
        let replaced = inner.images.get(&key).map(|b| b.len() as u64).unwrap_or(0);
        self.check_quota(&inner, replaced, blob.len() as u64)?;
        inner.images.insert(key, blob);
        Ok(())
    }

    async fn image_blob(&self, id: &SongId, quality: &Quality) -> Result<Option<Bytes>> {
        let inner = self.inner.read().await;
        Ok(inner.images.get(&(id.clone(), quality.clone())).cloned())
    }

    async fn storage_size(&self) -> Result<u64> {
        let inner = self.inner.read().await;
        Ok(inner.used_bytes())
    }

    async fn quota_bytes(&self) -> Result<Option<u64>> {
        Ok(self.quota_bytes)
    }

    async fn delete_song(&self, id: &SongId) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.songs.remove(id);
        inner.audio.remove(id);
        inner.images.retain(|(song_id, _), _| song_id != id);
        Ok(())
    }

    async fn clear_all(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.songs.clear();
        inner.audio.clear();
        inner.images.clear();
        Ok(())
    }
}
