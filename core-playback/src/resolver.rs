//! # Playback Source Resolution
//!
//! Decides where the player reads audio from, in strict preference order:
//!
//! 1. **Cached blob** from the persistent store, wrapped in a [`BlobHandle`]
//!    lease. Verified against the recorded digest when integrity checks are
//!    on; an entry the index claims but the store cannot back is healed down
//!    to metadata-only and treated as not cached.
//! 2. **Unavailable** when offline with no cached copy. No network attempt.
//! 3. **Remote URL** of the preferred variant, else the last listed one.
//!
//! Resolution is memoized by song identity: the resolver holds one live
//! resolution and hands out clones until the song changes. Store failures
//! degrade to `Unavailable` with a warning; the playback engine never sees
//! an error from this path.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};

use core_cache::{CacheConfig, CacheIndex};
use core_runtime::events::{CacheEvent, CoreEvent, EventBus, PlaybackEvent};
use core_store::{AudioState, PersistentStore, Quality, Song, SongId};

use crate::offline::OfflineModeController;

// ============================================================================
// Blob Handle
// ============================================================================

/// Scoped lease on a cached audio blob.
///
/// Every clone counts against the resolver's live-handle counter and is
/// released on [`release`](Self::release) or drop, whichever comes first.
/// The payload itself is cheaply shared [`Bytes`].
pub struct BlobHandle {
    data: Bytes,
    counter: Option<Arc<AtomicUsize>>,
}

impl BlobHandle {
    fn new(data: Bytes, counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self {
            data,
            counter: Some(counter),
        }
    }

    /// The cached audio bytes.
    pub fn bytes(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Release the lease now instead of at drop.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Some(counter) = self.counter.take() {
            counter.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Clone for BlobHandle {
    fn clone(&self) -> Self {
        if let Some(counter) = &self.counter {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        Self {
            data: self.data.clone(),
            counter: self.counter.clone(),
        }
    }
}

impl Drop for BlobHandle {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl fmt::Debug for BlobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobHandle")
            .field("len", &self.data.len())
            .field("released", &self.counter.is_none())
            .finish()
    }
}

// ============================================================================
// Resolved Source
// ============================================================================

/// Where the player should read a song from.
#[derive(Debug, Clone)]
pub enum ResolvedSource {
    /// Local cached audio, held through a lease.
    Cached { handle: BlobHandle },
    /// Stream from the catalog-supplied URL.
    Remote { url: String, quality: Quality },
    /// Nothing playable right now; skip or notify.
    Unavailable,
}

impl ResolvedSource {
    pub fn is_cached(&self) -> bool {
        matches!(self, ResolvedSource::Cached { .. })
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, ResolvedSource::Remote { .. })
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, ResolvedSource::Unavailable)
    }
}

// ============================================================================
// Source Resolver
// ============================================================================

/// Resolves songs to playable sources for the playback engine.
pub struct SourceResolver {
    config: CacheConfig,
    store: Arc<dyn PersistentStore>,
    index: Arc<CacheIndex>,
    offline: Arc<OfflineModeController>,
    events: Option<Arc<EventBus>>,
    /// Handles alive anywhere, the memoized one included
    live: Arc<AtomicUsize>,
    /// One held resolution, keyed by song id
    memo: Mutex<Option<(SongId, ResolvedSource)>>,
}

impl SourceResolver {
    /// Create a new resolver.
    ///
    /// # Arguments
    ///
    /// * `config` - Cache configuration (preferred quality, integrity checks)
    /// * `store` - Persistent storage backend
    /// * `index` - In-memory cache index
    /// * `offline` - Offline mode controller
    pub fn new(
        config: CacheConfig,
        store: Arc<dyn PersistentStore>,
        index: Arc<CacheIndex>,
        offline: Arc<OfflineModeController>,
    ) -> Self {
        Self {
            config,
            store,
            index,
            offline,
            events: None,
            live: Arc::new(AtomicUsize::new(0)),
            memo: Mutex::new(None),
        }
    }

    /// Set event bus for skip notifications and heal events.
    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.events = Some(event_bus);
        self
    }

    /// Resolve a song to a playable source.
    ///
    /// A repeated call for the currently held song returns a clone of the
    /// held resolution without touching the store. A different song releases
    /// the previous handle and resolves fresh.
    #[instrument(skip(self, song), fields(song_id = %song.id))]
    pub async fn resolve(&self, song: &Song) -> ResolvedSource {
        if let Some(source) = self.memoized(&song.id) {
            debug!("Returning held resolution");
            return source;
        }

        let source = self.resolve_fresh(song).await;

        // Replacing the slot drops the previous resolution, which releases
        // its handle.
        let mut memo = self.memo.lock();
        *memo = Some((song.id.clone(), source.clone()));
        source
    }

    /// Advance through the queue from `start`, skipping unavailable songs.
    ///
    /// Makes at most one full cycle over the queue. Each skip emits one
    /// `PlaybackEvent::SkippedUnavailable`; when nothing in the queue is
    /// playable, emits a final `PlaybackEvent::QueueUnavailable` and returns
    /// `None`. An empty queue returns `None` without events.
    #[instrument(skip(self, queue))]
    pub async fn advance_past_unavailable(
        &self,
        queue: &[Song],
        start: usize,
    ) -> Option<(usize, ResolvedSource)> {
        if queue.is_empty() {
            return None;
        }

        let len = queue.len();
        let mut skipped = 0usize;

        for offset in 0..len {
            let pos = (start + offset) % len;
            let song = &queue[pos];
            match self.resolve(song).await {
                ResolvedSource::Unavailable => {
                    skipped += 1;
                    debug!(song_id = %song.id, position = pos, "Skipping unavailable song");
                    self.emit(CoreEvent::Playback(PlaybackEvent::SkippedUnavailable {
                        song_id: song.id.to_string(),
                        title: song.title.clone(),
                    }));
                }
                playable => return Some((pos, playable)),
            }
        }

        warn!(skipped, "No playable song in queue");
        self.emit(CoreEvent::Playback(PlaybackEvent::QueueUnavailable {
            skipped,
        }));
        None
    }

    /// Whether a song currently has a committed cached copy.
    pub fn is_song_cached(&self, id: &SongId) -> bool {
        self.index.has(id)
    }

    /// Handles alive right now, the resolver's memoized one included.
    pub fn live_handles(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Drop the held resolution and its handle, e.g. when playback unmounts
    /// or the offline mode flips.
    pub fn reset(&self) {
        *self.memo.lock() = None;
    }

    // ===== Internals =====

    fn memoized(&self, id: &SongId) -> Option<ResolvedSource> {
        let memo = self.memo.lock();
        match &*memo {
            Some((held, source)) if held == id => Some(source.clone()),
            _ => None,
        }
    }

    async fn resolve_fresh(&self, song: &Song) -> ResolvedSource {
        if self.index.has(&song.id) {
            match self.load_cached(song).await {
                Ok(Some(handle)) => {
                    debug!(size_bytes = handle.len(), "Resolved to cached blob");
                    return ResolvedSource::Cached { handle };
                }
                // Healed to metadata-only; fall through to the remote path.
                Ok(None) => {}
                Err(e) => {
                    warn!(song_id = %song.id, error = %e, "Cached source unreadable");
                    return ResolvedSource::Unavailable;
                }
            }
        }

        if self.offline.is_offline() {
            debug!(song_id = %song.id, "Offline without a cached copy");
            return ResolvedSource::Unavailable;
        }

        match song.select_download(&self.config.preferred_quality) {
            Some(variant) => {
                debug!(quality = %variant.quality, "Resolved to remote stream");
                ResolvedSource::Remote {
                    url: variant.url.clone(),
                    quality: variant.quality.clone(),
                }
            }
            None => {
                warn!(song_id = %song.id, "No download variants to stream from");
                ResolvedSource::Unavailable
            }
        }
    }

    /// Load and verify the cached blob. `Ok(None)` means the entry was
    /// inconsistent and has been healed down to metadata-only.
    async fn load_cached(&self, song: &Song) -> core_store::Result<Option<BlobHandle>> {
        let Some(blob) = self.store.audio_blob(&song.id).await? else {
            self.heal_inconsistent(song, "audio blob missing from store")
                .await;
            return Ok(None);
        };

        if self.config.verify_integrity {
            if let Some(expected) = self.recorded_digest(&song.id) {
                let mut hasher = Sha256::new();
                hasher.update(&blob);
                let digest = format!("{:x}", hasher.finalize());
                if digest != expected {
                    self.heal_inconsistent(song, "audio blob digest mismatch")
                        .await;
                    return Ok(None);
                }
            }
        }

        Ok(Some(BlobHandle::new(blob, self.live.clone())))
    }

    fn recorded_digest(&self, id: &SongId) -> Option<String> {
        match self.index.get(id)?.audio {
            AudioState::Cached { content_sha256, .. } => Some(content_sha256),
            AudioState::MetadataOnly => None,
        }
    }

    /// Downgrade an entry the store cannot back. Store first, index after,
    /// so the index never over-reports; a failed record write still
    /// downgrades the index.
    async fn heal_inconsistent(&self, song: &Song, detail: &str) {
        warn!(song_id = %song.id, detail, "Healing inconsistent cache entry");

        if let Some(entry) = self.index.get(&song.id) {
            let downgraded = entry.into_metadata_only();
            if let Err(e) = self.store.save_song(&downgraded).await {
                warn!(song_id = %song.id, error = %e, "Could not persist healed entry");
            }
            self.index.mark_metadata_only(downgraded);
        } else {
            self.index.mark_evicted(&song.id);
        }

        self.emit(CoreEvent::Cache(CacheEvent::Healed {
            song_id: song.id.to_string(),
            detail: detail.to_string(),
        }));
    }

    fn emit(&self, event: CoreEvent) {
        if let Some(bus) = &self.events {
            bus.emit(event).ok();
        }
    }
}

impl fmt::Debug for SourceResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceResolver")
            .field("live_handles", &self.live_handles())
            .finish_non_exhaustive()
    }
}
