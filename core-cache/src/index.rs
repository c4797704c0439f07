//! # Cache Index
//!
//! In-memory mirror of the durable store, rebuilt once at startup.
//!
//! ## Overview
//!
//! The index answers "is this song available offline?" without touching the
//! store on every query. It is a mirror, not a source of truth: every
//! mutation here happens strictly after the corresponding durable mutation
//! succeeded. The index may briefly under-report while a commit is in
//! flight; it never over-reports.
//!
//! Construction is the rebuild. There is no way to hold an index that has
//! not scanned the store, so "still loading" can never be misread as "not
//! cached".

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::{debug, warn};

use core_store::{CacheEntry, PersistentStore, SongId};

use crate::error::Result;

/// In-memory view of every durable cache record, keyed by song id.
pub struct CacheIndex {
    entries: RwLock<HashMap<SongId, CacheEntry>>,
}

impl CacheIndex {
    /// Scan the store and build the index.
    ///
    /// Records claiming cached audio are cross-checked against the blob
    /// collection; a record whose blob is gone (platform eviction, manual
    /// deletion) is degraded to metadata-only, in memory and durably.
    ///
    /// # Errors
    ///
    /// Fails only when the store scan itself fails. A failed durable
    /// downgrade is logged and the in-memory entry is degraded anyway, so
    /// the index still does not over-report.
    pub async fn rebuild(store: &dyn PersistentStore) -> Result<Self> {
        let records = store.all_songs().await?;
        let mut entries = HashMap::with_capacity(records.len());
        let mut healed = 0usize;

        for entry in records {
            let entry = if entry.is_fully_cached() && !store.has_audio_blob(entry.id()).await? {
                warn!(
                    song_id = %entry.id(),
                    "Record claims cached audio but the blob is missing, degrading to metadata-only"
                );
                let degraded = entry.into_metadata_only();
                if let Err(e) = store.save_song(&degraded).await {
                    warn!(song_id = %degraded.id(), error = %e, "Could not persist degraded record");
                }
                healed += 1;
                degraded
            } else {
                entry
            };
            entries.insert(entry.id().clone(), entry);
        }

        debug!(
            records = entries.len(),
            healed, "Cache index rebuilt from store"
        );

        Ok(Self {
            entries: RwLock::new(entries),
        })
    }

    /// Record a committed download. Call only after both the blob and the
    /// upgraded record are durable.
    pub fn mark_cached(&self, entry: CacheEntry) {
        debug_assert!(entry.is_fully_cached());
        self.entries.write().insert(entry.id().clone(), entry);
    }

    /// Record a metadata-only entry, inserting or downgrading as needed.
    /// Call only after the durable record exists.
    pub fn mark_metadata_only(&self, entry: CacheEntry) {
        let entry = entry.into_metadata_only();
        self.entries.write().insert(entry.id().clone(), entry);
    }

    /// Drop a song from the index. Call only after the durable delete
    /// succeeded. No-op for unknown ids.
    pub fn mark_evicted(&self, id: &SongId) {
        self.entries.write().remove(id);
    }

    /// True only when the song's audio is durably cached.
    pub fn has(&self, id: &SongId) -> bool {
        self.entries
            .read()
            .get(id)
            .map(|e| e.is_fully_cached())
            .unwrap_or(false)
    }

    /// Clone of the entry, cached or metadata-only.
    pub fn get(&self, id: &SongId) -> Option<CacheEntry> {
        self.entries.read().get(id).cloned()
    }

    /// Snapshot of every entry. Unordered.
    pub fn all(&self) -> Vec<CacheEntry> {
        self.entries.read().values().cloned().collect()
    }

    /// Number of fully cached songs.
    pub fn cached_count(&self) -> usize {
        self.entries
            .read()
            .values()
            .filter(|e| e.is_fully_cached())
            .count()
    }

    /// Number of entries, cached or metadata-only.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Forget everything. Call only after the store was durably cleared.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl std::fmt::Debug for CacheIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.entries.read();
        f.debug_struct("CacheIndex")
            .field("entries", &entries.len())
            .field(
                "cached",
                &entries.values().filter(|e| e.is_fully_cached()).count(),
            )
            .finish()
    }
}
