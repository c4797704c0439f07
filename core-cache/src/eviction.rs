//! # Eviction
//!
//! Keeps the cache under its byte ceiling by deleting the oldest cached
//! songs first.
//!
//! ## Policy
//!
//! Strictly oldest `cached_at` first, ties broken by song id, so two passes
//! over the same state pick the same victims. Access recency is deliberately
//! untracked; this is insertion-order LRU, not play-order. The currently
//! playing song is never a victim, even when it is the only thing left and
//! the cache stays over the ceiling.
//!
//! ## Failure posture
//!
//! A storage failure mid-pass ends the pass where it stands. An over-budget
//! cache is a degraded state the next pass can fix; a half-deleted song is
//! not.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use core_runtime::events::{CacheEvent, CoreEvent, EventBus};
use core_store::{PersistentStore, SongId};

use crate::config::CacheConfig;
use crate::error::Result;
use crate::index::CacheIndex;

/// Outcome of one eviction pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionReport {
    /// Songs deleted this pass, in eviction order
    pub evicted: Vec<SongId>,
    /// Storage delta across the pass
    pub freed_bytes: u64,
    /// True when another pass was already running and this one did nothing
    pub skipped: bool,
}

impl EvictionReport {
    fn empty() -> Self {
        Self {
            evicted: Vec::new(),
            freed_bytes: 0,
            skipped: false,
        }
    }

    /// Report for a pass coalesced into an already-running one.
    pub fn skipped() -> Self {
        Self {
            evicted: Vec::new(),
            freed_bytes: 0,
            skipped: true,
        }
    }

    pub fn evicted_count(&self) -> usize {
        self.evicted.len()
    }
}

/// Oldest-first evictor over the store and index.
pub struct Evictor {
    config: CacheConfig,
    store: Arc<dyn PersistentStore>,
    index: Arc<CacheIndex>,
    events: Option<Arc<EventBus>>,
    /// Song the playback layer currently holds; never evicted
    active_song: RwLock<Option<SongId>>,
    /// Held for the duration of a pass; concurrent passes coalesce
    pass_lock: Mutex<()>,
}

impl Evictor {
    pub fn new(config: CacheConfig, store: Arc<dyn PersistentStore>, index: Arc<CacheIndex>) -> Self {
        Self {
            config,
            store,
            index,
            events: None,
            active_song: RwLock::new(None),
            pass_lock: Mutex::new(()),
        }
    }

    /// Set event bus for eviction events.
    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.events = Some(event_bus);
        self
    }

    /// Tell the evictor which song playback currently holds. Pass `None`
    /// when playback stops.
    pub fn set_active_song(&self, id: Option<SongId>) {
        *self.active_song.write() = id;
    }

    /// The song currently protected via [`set_active_song`](Self::set_active_song).
    pub fn active_song(&self) -> Option<SongId> {
        self.active_song.read().clone()
    }

    /// Run one eviction pass if the cache is over its ceiling.
    ///
    /// `active` protects one more song for this pass, on top of whatever
    /// [`set_active_song`](Self::set_active_song) holds; pipeline-triggered
    /// passes pass `None` and still never touch the playing song.
    ///
    /// Storage failures end the pass as a no-op remainder with a warning;
    /// the report covers whatever was evicted before the failure.
    #[instrument(skip(self, active))]
    pub async fn evict_if_needed(&self, active: Option<&SongId>) -> Result<EvictionReport> {
        let _guard = match self.pass_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("Eviction pass already running, coalescing");
                return Ok(EvictionReport::skipped());
            }
        };

        let ceiling = self.config.max_cache_size_bytes;
        let mut report = EvictionReport::empty();

        let start_used = match self.store.storage_size().await {
            Ok(used) => used,
            Err(e) => {
                warn!(error = %e, "Could not read storage size, skipping eviction pass");
                return Ok(report);
            }
        };

        let mut used = start_used;

        while used > ceiling {
            let protected = self.active_song.read().clone();
            let victim = self
                .index
                .all()
                .into_iter()
                .filter(|e| e.is_fully_cached())
                .filter(|e| Some(e.id()) != active)
                .filter(|e| protected.as_ref() != Some(e.id()))
                .min_by(|a, b| {
                    a.cached_at
                        .cmp(&b.cached_at)
                        .then_with(|| a.id().cmp(b.id()))
                });

            let Some(entry) = victim else {
                info!(
                    used_bytes = used,
                    ceiling_bytes = ceiling,
                    "Over ceiling but nothing evictable remains"
                );
                break;
            };

            let id = entry.id().clone();
            let audio_bytes = entry.audio.size_bytes().unwrap_or(0);

            if let Err(e) = self.store.delete_song(&id).await {
                warn!(song_id = %id, error = %e, "Eviction delete failed, ending pass");
                break;
            }

            self.index.mark_evicted(&id);
            self.emit(CoreEvent::Cache(CacheEvent::Evicted {
                song_id: id.to_string(),
                freed_bytes: audio_bytes,
            }));

            info!(song_id = %id, freed_bytes = audio_bytes, "Evicted song");
            report.evicted.push(id);

            used = match self.store.storage_size().await {
                Ok(u) => u,
                Err(e) => {
                    warn!(error = %e, "Could not re-read storage size, ending pass");
                    break;
                }
            };
        }

        report.freed_bytes = start_used.saturating_sub(used);

        if !report.evicted.is_empty() {
            info!(
                evicted = report.evicted_count(),
                freed_bytes = report.freed_bytes,
                used_bytes = used,
                ceiling_bytes = ceiling,
                "Eviction pass complete"
            );
        }

        Ok(report)
    }

    fn emit(&self, event: CoreEvent) {
        if let Some(bus) = &self.events {
            bus.emit(event).ok();
        }
    }
}

impl std::fmt::Debug for Evictor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Evictor")
            .field("ceiling_bytes", &self.config.max_cache_size_bytes)
            .field("active_song", &self.active_song.read())
            .finish()
    }
}
