//! Filesystem-backed store
//!
//! Native implementation of [`PersistentStore`] using `tokio::fs`. Layout
//! under the injected root:
//!
//! ```text
//! <root>/songs/<key>.json      song records (JSON documents)
//! <root>/audio/<key>.bin       audio blobs
//! <root>/images/<key>/<q>.img  image blobs, one directory per song
//! ```
//!
//! Blob and record writes stage to a sibling temp file and rename into
//! place, so a concurrent reader sees the old content or the new content
//! and never a torn prefix. Stale temp files from interrupted writes are
//! swept on open.

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::models::{CacheEntry, Quality, SongId};
use crate::store::PersistentStore;

const SONGS_DIR: &str = "songs";
const AUDIO_DIR: &str = "audio";
const IMAGES_DIR: &str = "images";
const TMP_MARKER: &str = ".tmp-";

/// Catalog ids and quality labels are arbitrary strings; file names must be
/// filesystem-safe and collision-free. Keeps a readable prefix and appends
/// a short digest of the raw value.
fn file_key(raw: &str) -> String {
    let mut prefix: String = raw
        .chars()
        .take(40)
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if prefix.is_empty() {
        prefix.push('x');
    }
    let digest = Sha256::digest(raw.as_bytes());
    format!("{}-{}", prefix, hex::encode(&digest[..8]))
}

fn ignore_not_found(result: std::io::Result<()>) -> std::io::Result<()> {
    match result {
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Filesystem [`PersistentStore`] rooted at an injected directory.
pub struct FsStore {
    root: PathBuf,
    quota_override: Option<u64>,
}

impl FsStore {
    /// Open (and create if needed) a store under `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for dir in [SONGS_DIR, AUDIO_DIR, IMAGES_DIR] {
            fs::create_dir_all(root.join(dir)).await?;
        }
        let store = Self {
            root,
            quota_override: None,
        };
        store.sweep_temp_files().await;
        Ok(store)
    }

    /// Report (and enforce) a quota. Without this the filesystem backend has
    /// no portable way to learn its limit and reports `None`.
    pub fn with_quota(mut self, quota_bytes: u64) -> Self {
        self.quota_override = Some(quota_bytes);
        self
    }

    /// Platform-conventional default root.
    pub fn default_root() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("offline-media-cache")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn song_path(&self, id: &SongId) -> PathBuf {
        self.root
            .join(SONGS_DIR)
            .join(format!("{}.json", file_key(id.as_str())))
    }

    fn audio_path(&self, id: &SongId) -> PathBuf {
        self.root
            .join(AUDIO_DIR)
            .join(format!("{}.bin", file_key(id.as_str())))
    }

    fn image_dir(&self, id: &SongId) -> PathBuf {
        self.root.join(IMAGES_DIR).join(file_key(id.as_str()))
    }

    fn image_path(&self, id: &SongId, quality: &Quality) -> PathBuf {
        self.image_dir(id)
            .join(format!("{}.img", file_key(quality.as_str())))
    }

    /// Stage-then-rename write. On rename failure the temp file is removed
    /// so a failed commit leaves no trace.
    async fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("blob")
            .to_string();
        let tmp = path.with_file_name(format!("{}{}{}", name, TMP_MARKER, Uuid::new_v4()));

        fs::write(&tmp, data).await?;
        if let Err(e) = fs::rename(&tmp, path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        debug!(path = ?path, size = data.len(), "Committed file");
        Ok(())
    }

    /// Remove leftovers of interrupted writes. Best effort; failures are
    /// logged and skipped.
    async fn sweep_temp_files(&self) {
        for dir in [
            self.root.join(SONGS_DIR),
            self.root.join(AUDIO_DIR),
            self.root.join(IMAGES_DIR),
        ] {
            self.sweep_dir(&dir, true).await;
        }
    }

    async fn sweep_dir(&self, dir: &Path, descend: bool) {
        let mut read_dir = match fs::read_dir(dir).await {
            Ok(rd) => rd,
            Err(_) => return,
        };
        while let Ok(Some(entry)) = read_dir.next_entry().await {
            let path = entry.path();
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            if is_dir {
                if descend {
                    Box::pin(self.sweep_dir(&path, false)).await;
                }
                continue;
            }
            let name = entry.file_name();
            if name.to_string_lossy().contains(TMP_MARKER) {
                debug!(path = ?path, "Sweeping stale temp file");
                let _ = fs::remove_file(&path).await;
            }
        }
    }

    async fn flat_dir_size(&self, dir: &Path) -> Result<u64> {
        let mut total = 0u64;
        let mut read_dir = match fs::read_dir(dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = read_dir.next_entry().await? {
            let metadata = entry.metadata().await?;
            if metadata.is_file() {
                total += metadata.len();
            }
        }
        Ok(total)
    }

    async fn blob_bytes(&self) -> Result<u64> {
        let mut total = self.flat_dir_size(&self.root.join(AUDIO_DIR)).await?;

        // images/ nests one directory per song
        let images = self.root.join(IMAGES_DIR);
        let mut read_dir = match fs::read_dir(&images).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(total),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = read_dir.next_entry().await? {
            let metadata = entry.metadata().await?;
            if metadata.is_dir() {
                total += self.flat_dir_size(&entry.path()).await?;
            } else if metadata.is_file() {
                total += metadata.len();
            }
        }
        Ok(total)
    }

    /// Quota gate for blob writes. Only active when a quota override is
    /// configured; checked before any byte is staged.
    async fn check_quota(&self, target: &Path, incoming: u64) -> Result<()> {
        let Some(quota) = self.quota_override else {
            return Ok(());
        };
        let replaced = match fs::metadata(target).await {
            Ok(m) => m.len(),
            Err(_) => 0,
        };
        let base = self.blob_bytes().await?.saturating_sub(replaced);
        if base + incoming > quota {
            return Err(StoreError::QuotaExceeded {
                needed: incoming,
                available: quota.saturating_sub(base),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PersistentStore for FsStore {
    async fn save_song(&self, entry: &CacheEntry) -> Result<()> {
        let json = serde_json::to_vec(entry)?;
        self.write_atomic(&self.song_path(entry.id()), &json).await
    }

    async fn song(&self, id: &SongId) -> Result<Option<CacheEntry>> {
        let path = self.song_path(id);
        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let entry = serde_json::from_slice(&data).map_err(|e| StoreError::Corrupt {
            id: id.to_string(),
            detail: e.to_string(),
        })?;
        Ok(Some(entry))
    }

    async fn all_songs(&self) -> Result<Vec<CacheEntry>> {
        let dir = self.root.join(SONGS_DIR);
        let mut entries = Vec::new();
        let mut read_dir = match fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(e.into()),
        };
        while let Some(file) = read_dir.next_entry().await? {
            let path = file.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let data = match fs::read(&path).await {
                Ok(data) => data,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            match serde_json::from_slice::<CacheEntry>(&data) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    // One rotten record must not take the whole cache down.
                    warn!(path = ?path, error = %e, "Skipping unreadable song record");
                }
            }
        }
        Ok(entries)
    }

    async fn save_audio_blob(&self, id: &SongId, blob: Bytes) -> Result<()> {
        let path = self.audio_path(id);
        self.check_quota(&path, blob.len() as u64).await?;
        self.write_atomic(&path, &blob).await
    }

    async fn audio_blob(&self, id: &SongId) -> Result<Option<Bytes>> {
        match fs::read(self.audio_path(id)).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn has_audio_blob(&self, id: &SongId) -> Result<bool> {
        match fs::metadata(self.audio_path(id)).await {
            Ok(m) => Ok(m.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn save_image_blob(&self, id: &SongId, quality: &Quality, blob: Bytes) -> Result<()> {
        let path = self.image_path(id, quality);
        self.check_quota(&path, blob.len() as u64).await?;
        self.write_atomic(&path, &blob).await
    }

    async fn image_blob(&self, id: &SongId, quality: &Quality) -> Result<Option<Bytes>> {
        match fs::read(self.image_path(id, quality)).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn storage_size(&self) -> Result<u64> {
        self.blob_bytes().await
    }

    async fn quota_bytes(&self) -> Result<Option<u64>> {
        Ok(self.quota_override)
    }

    async fn delete_song(&self, id: &SongId) -> Result<()> {
        ignore_not_found(fs::remove_file(self.song_path(id)).await)?;
        ignore_not_found(fs::remove_file(self.audio_path(id)).await)?;
        match fs::remove_dir_all(self.image_dir(id)).await {
            Err(e) if e.kind() != ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }
        debug!(song_id = %id, "Deleted song from disk");
        Ok(())
    }

    async fn clear_all(&self) -> Result<()> {
        for dir in [SONGS_DIR, AUDIO_DIR, IMAGES_DIR] {
            let path = self.root.join(dir);
            match fs::remove_dir_all(&path).await {
                Err(e) if e.kind() != ErrorKind::NotFound => return Err(e.into()),
                _ => {}
            }
            fs::create_dir_all(&path).await?;
        }
        debug!(root = ?self.root, "Cleared store");
        Ok(())
    }
}
