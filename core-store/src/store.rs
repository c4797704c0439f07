//! Persistent store abstraction
//!
//! Durable key/value and blob storage behind the whole cache subsystem.
//! Everything above this trait is backend-agnostic: tests and headless
//! hosts inject [`MemoryStore`](crate::MemoryStore), native hosts inject
//! [`FsStore`](crate::FsStore).

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;
use crate::models::{CacheEntry, Quality, SongId};

/// Durable storage for song records, audio blobs, and image blobs.
///
/// # Failure contract
///
/// Every operation either takes full effect or none: a returned error means
/// the observable state is unchanged. Blob writes in particular must be
/// atomic with respect to readers; a concurrent read sees the previous blob
/// or the new one, never a torn prefix.
///
/// Records and blobs are independent collections. Callers sequence writes so
/// that a record only claims [`AudioState::Cached`](crate::AudioState) after
/// the blob commit succeeded; the store itself does not enforce that order.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    /// Upsert the durable record for a song. Idempotent.
    async fn save_song(&self, entry: &CacheEntry) -> Result<()>;

    /// Fetch one record. `Ok(None)` for unknown ids.
    async fn song(&self, id: &SongId) -> Result<Option<CacheEntry>>;

    /// Every record in the store. Startup-scan only; O(n) reads allowed.
    async fn all_songs(&self) -> Result<Vec<CacheEntry>>;

    /// Commit an audio blob, replacing any previous blob for the id.
    ///
    /// # Errors
    ///
    /// [`StoreError::QuotaExceeded`](crate::StoreError) when the write would
    /// overflow a known quota; in that case nothing was written.
    async fn save_audio_blob(&self, id: &SongId, blob: Bytes) -> Result<()>;

    /// Read back a committed audio blob. `Ok(None)` when absent.
    async fn audio_blob(&self, id: &SongId) -> Result<Option<Bytes>>;

    /// Existence check that avoids reading blob contents.
    async fn has_audio_blob(&self, id: &SongId) -> Result<bool>;

    /// Commit an image blob keyed by song and quality label.
    async fn save_image_blob(&self, id: &SongId, quality: &Quality, blob: Bytes) -> Result<()>;

    /// Read back a committed image blob. `Ok(None)` when absent.
    async fn image_blob(&self, id: &SongId, quality: &Quality) -> Result<Option<Bytes>>;

    /// Total bytes of committed blobs (audio plus images), recomputed from
    /// the backing store on every call. Never a cached counter.
    async fn storage_size(&self) -> Result<u64>;

    /// Platform-granted quota in bytes, when the backend knows one.
    async fn quota_bytes(&self) -> Result<Option<u64>>;

    /// Remove the record, the audio blob, and every image for the song.
    /// Completes without error when the id is unknown.
    async fn delete_song(&self, id: &SongId) -> Result<()>;

    /// Remove everything: records, audio, and images.
    async fn clear_all(&self) -> Result<()>;
}
