//! # Download Pipeline
//!
//! Orchestrator for fetching songs into the offline cache.
//!
//! The pipeline owns the per-song task registry and drives the full
//! download lifecycle:
//! - Idempotent entry: already-cached songs return immediately, in-flight
//!   songs coalesce instead of downloading twice
//! - Streaming fetch with incremental SHA-256 and progress events
//! - Bounded retry with exponential backoff for transient failures
//! - Durable commit order that never lets the store over-claim: audio blob
//!   first, record upgrade second, index last
//! - Best-effort artwork alongside audio
//! - An awaited eviction pass after every successful commit

use bytes::BytesMut;
use sha2::{Digest, Sha256};
use std::io;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use bridge_traits::error::BridgeError;
use bridge_traits::http::HttpClient;
use bridge_traits::time::Clock;
use core_runtime::events::{CacheEvent, CoreEvent, DownloadEvent, EventBus};
use core_store::{CacheEntry, DownloadVariant, PersistentStore, RemoteCatalog, Song, SongId};

use crate::budget::StorageBudget;
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::eviction::Evictor;
use crate::index::CacheIndex;
use crate::tasks::{DownloadTask, TaskRegistry};

/// Bytes reserved per read on the download stream.
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Terminal result of a download request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// The song was fully cached before any work happened.
    AlreadyCached,
    /// Another task for the same song is in flight; this call did nothing.
    AlreadyInFlight,
    /// Audio was committed durably.
    Completed {
        /// Committed blob size in bytes.
        size_bytes: u64,
        /// Attempts used, including the successful one.
        attempts: u32,
    },
    /// The song was removed (or the cache cleared) while downloading.
    Cancelled,
}

/// How a successful attempt ended, before task bookkeeping.
enum AttemptEnd {
    Committed { size_bytes: u64 },
    Cancelled,
}

/// Download pipeline for fetching and committing songs.
pub struct DownloadPipeline {
    config: CacheConfig,
    store: Arc<dyn PersistentStore>,
    catalog: Arc<dyn RemoteCatalog>,
    http: Arc<dyn HttpClient>,
    clock: Arc<dyn Clock>,
    index: Arc<CacheIndex>,
    evictor: Arc<Evictor>,
    events: Option<Arc<EventBus>>,
    tasks: TaskRegistry,
}

impl DownloadPipeline {
    /// Create a new download pipeline.
    ///
    /// # Arguments
    ///
    /// * `config` - Cache configuration (validated here)
    /// * `store` - Durable record and blob storage
    /// * `catalog` - Remote catalog for id-based lookups
    /// * `http` - HTTP client for media fetches
    /// * `clock` - Time source for `cached_at` stamps
    /// * `index` - Shared in-memory cache index
    /// * `evictor` - Evictor run after each successful commit
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Config`] when the configuration fails
    /// validation.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// use core_cache::{CacheConfig, CacheIndex, DownloadPipeline, Evictor};
    /// use std::sync::Arc;
    ///
    /// let index = Arc::new(CacheIndex::rebuild(store.as_ref()).await?);
    /// let evictor = Arc::new(Evictor::new(config.clone(), store.clone(), index.clone()));
    /// let pipeline = DownloadPipeline::new(
    ///     config, store, catalog, http, clock, index, evictor,
    /// )?;
    /// ```
    pub fn new(
        config: CacheConfig,
        store: Arc<dyn PersistentStore>,
        catalog: Arc<dyn RemoteCatalog>,
        http: Arc<dyn HttpClient>,
        clock: Arc<dyn Clock>,
        index: Arc<CacheIndex>,
        evictor: Arc<Evictor>,
    ) -> Result<Self> {
        config.validate().map_err(CacheError::Config)?;

        Ok(Self {
            config,
            store,
            catalog,
            http,
            clock,
            index,
            evictor,
            events: None,
            tasks: TaskRegistry::new(),
        })
    }

    /// Set event bus for download lifecycle events.
    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.events = Some(event_bus);
        self
    }

    /// Whether a song is fully cached right now.
    pub fn is_cached(&self, id: &SongId) -> bool {
        self.index.has(id)
    }

    /// Download a song into the offline cache.
    ///
    /// This method:
    /// 1. Returns `AlreadyCached` without touching the network when the
    ///    index reports the song fully cached
    /// 2. Claims the per-song task slot, or returns `AlreadyInFlight`
    /// 3. Persists a metadata-only record so the snapshot survives failure
    /// 4. Streams the chosen rendition with bounded retry
    /// 5. Commits blob, record, and index in that order
    /// 6. Fetches artwork best-effort, then runs an eviction pass
    #[instrument(skip(self, song), fields(song_id = %song.id))]
    pub async fn download_song(&self, song: &Song) -> Result<DownloadOutcome> {
        if self.index.has(&song.id) {
            debug!("Song {} is already cached", song.id);
            return Ok(DownloadOutcome::AlreadyCached);
        }

        let Some(cancel) = self.tasks.begin(&song.id).await else {
            debug!("Download for song {} already in flight", song.id);
            return Ok(DownloadOutcome::AlreadyInFlight);
        };

        // A concurrent task may have committed between the fast-path check
        // and the slot claim.
        if self.index.has(&song.id) {
            self.tasks.mark_completed(&song.id).await;
            return Ok(DownloadOutcome::AlreadyCached);
        }

        let Some(variant) = song.select_download(&self.config.preferred_quality) else {
            let err = CacheError::NoVariants(song.id.to_string());
            self.tasks.mark_failed(&song.id, err.to_string()).await;
            self.emit(CoreEvent::Download(DownloadEvent::Failed {
                song_id: song.id.to_string(),
                message: err.to_string(),
                attempts: 0,
            }));
            return Err(err);
        };

        // The snapshot is durable before any bytes move, so a failed
        // download still leaves the song displayable.
        let entry = CacheEntry::metadata_only(song.clone(), self.clock.unix_timestamp());
        if let Err(e) = self.store.save_song(&entry).await {
            let err = CacheError::from(e);
            self.tasks.mark_failed(&song.id, err.to_string()).await;
            self.emit(CoreEvent::Download(DownloadEvent::Failed {
                song_id: song.id.to_string(),
                message: err.to_string(),
                attempts: 0,
            }));
            return Err(err);
        }
        self.index.mark_metadata_only(entry);

        info!(
            song_id = %song.id,
            title = %song.title,
            quality = %variant.quality,
            "Starting download"
        );
        self.emit(CoreEvent::Download(DownloadEvent::Started {
            song_id: song.id.to_string(),
            title: song.title.clone(),
            quality: variant.quality.to_string(),
            total_bytes: None,
        }));

        let (attempts, result) = self.download_with_retry(song, variant, &cancel).await;

        match result {
            Ok(AttemptEnd::Committed { size_bytes }) => {
                self.tasks.mark_completed(&song.id).await;
                info!(song_id = %song.id, size_bytes, attempts, "Download completed");
                self.emit(CoreEvent::Download(DownloadEvent::Completed {
                    song_id: song.id.to_string(),
                    size_bytes,
                    attempts,
                }));

                // Awaited so callers observe post-eviction state; a failed
                // pass never fails a committed download.
                if let Err(e) = self.evictor.evict_if_needed(None).await {
                    warn!(song_id = %song.id, "Post-download eviction pass failed: {}", e);
                }

                Ok(DownloadOutcome::Completed {
                    size_bytes,
                    attempts,
                })
            }
            Ok(AttemptEnd::Cancelled) => {
                self.tasks.mark_failed(&song.id, "Download cancelled").await;
                info!(song_id = %song.id, "Download cancelled");
                Ok(DownloadOutcome::Cancelled)
            }
            Err(e) => {
                error!(song_id = %song.id, attempts, "Download failed: {}", e);
                self.tasks.mark_failed(&song.id, e.to_string()).await;
                self.emit(CoreEvent::Download(DownloadEvent::Failed {
                    song_id: song.id.to_string(),
                    message: e.to_string(),
                    attempts,
                }));
                Err(e)
            }
        }
    }

    /// Download a song by id, resolving the snapshot through the catalog.
    #[instrument(skip(self))]
    pub async fn download_by_id(&self, id: &SongId) -> Result<DownloadOutcome> {
        if self.index.has(id) {
            return Ok(DownloadOutcome::AlreadyCached);
        }

        let song = self.catalog.song(id).await?;
        self.download_song(&song).await
    }

    /// Download with automatic retry for transient failures.
    ///
    /// Returns the number of attempts made alongside the outcome. Errors
    /// that another attempt cannot fix (client errors, storage failures)
    /// surface immediately; transient ones are retried with exponential
    /// backoff until the attempt budget runs out.
    async fn download_with_retry(
        &self,
        song: &Song,
        variant: &DownloadVariant,
        cancel: &CancellationToken,
    ) -> (u32, Result<AttemptEnd>) {
        let mut last_error: Option<CacheError> = None;

        for attempt in 1..=self.config.max_retry_attempts {
            let delay = self.config.retry_delay_for(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if cancel.is_cancelled() {
                return (attempt, Ok(AttemptEnd::Cancelled));
            }

            debug!(
                "Download attempt {}/{} for song {}",
                attempt, self.config.max_retry_attempts, song.id
            );
            self.tasks.record_attempt(&song.id, attempt).await;

            let result = match self.config.download_timeout {
                Some(limit) => {
                    match tokio::time::timeout(
                        limit,
                        self.download_attempt(song, variant, cancel),
                    )
                    .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(CacheError::Network(BridgeError::Timeout(format!(
                            "download of song {}",
                            song.id
                        )))),
                    }
                }
                None => self.download_attempt(song, variant, cancel).await,
            };

            match result {
                Ok(end) => return (attempt, Ok(end)),
                Err(e) if e.is_retryable() => {
                    warn!(
                        "Download attempt {} for song {} failed: {}",
                        attempt, song.id, e
                    );
                    last_error = Some(e);
                }
                Err(e) => return (attempt, Err(e)),
            }
        }

        let attempts = self.config.max_retry_attempts;
        let message = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "download failed after all retries".to_string());
        (
            attempts,
            Err(CacheError::DownloadFailed { attempts, message }),
        )
    }

    /// One streaming attempt: fetch, hash, commit, artwork.
    async fn download_attempt(
        &self,
        song: &Song,
        variant: &DownloadVariant,
        cancel: &CancellationToken,
    ) -> Result<AttemptEnd> {
        let mut stream = self.http.fetch_stream(&variant.url).await?;
        let total_bytes = stream.content_length;
        self.tasks.set_downloading(&song.id, total_bytes).await;

        let mut data = BytesMut::new();
        let mut hasher = Sha256::new();
        let mut bytes_downloaded = 0u64;

        loop {
            if cancel.is_cancelled() {
                debug!("Download of song {} cancelled mid-stream", song.id);
                return Ok(AttemptEnd::Cancelled);
            }

            data.reserve(READ_CHUNK_SIZE);
            let chunk_start = data.len();
            let read = stream
                .reader
                .read_buf(&mut data)
                .await
                .map_err(BridgeError::from)?;
            if read == 0 {
                break;
            }

            hasher.update(&data[chunk_start..]);
            bytes_downloaded += read as u64;
            self.tasks.record_progress(&song.id, bytes_downloaded).await;
            self.emit(CoreEvent::Download(DownloadEvent::Progress {
                song_id: song.id.to_string(),
                bytes_downloaded,
                total_bytes,
                percent: percent_of(bytes_downloaded, total_bytes),
            }));
        }

        if let Some(expected) = total_bytes {
            if bytes_downloaded != expected {
                return Err(CacheError::Network(BridgeError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "truncated download: got {} of {} bytes",
                        bytes_downloaded, expected
                    ),
                ))));
            }
        }

        let size_bytes = data.len() as u64;
        let digest = format!("{:x}", hasher.finalize());
        self.store.save_audio_blob(&song.id, data.freeze()).await?;

        let entry = CacheEntry::cached(
            song.clone(),
            self.clock.unix_timestamp(),
            size_bytes,
            digest,
        );
        if let Err(e) = self.store.save_song(&entry).await {
            warn!(
                song_id = %song.id,
                "Record upgrade failed after blob commit: {}", e
            );
            // Pull the blob back out so the failure leaves at most the
            // metadata-only record.
            match self.store.delete_song(&song.id).await {
                Ok(()) => {
                    if let Err(restore) = self
                        .store
                        .save_song(&entry.clone().into_metadata_only())
                        .await
                    {
                        warn!(
                            song_id = %song.id,
                            "Could not restore metadata record: {}", restore
                        );
                    }
                }
                Err(del) => {
                    warn!(
                        song_id = %song.id,
                        "Could not remove orphaned audio blob: {}", del
                    );
                }
            }
            return Err(e.into());
        }
        self.index.mark_cached(entry);

        // remove_song sets the cancellation flag before deleting, so a
        // commit that lands after the delete always sees it here and backs
        // itself out.
        if cancel.is_cancelled() {
            self.undo_commit(&song.id).await;
            return Ok(AttemptEnd::Cancelled);
        }

        if self.config.download_images {
            self.fetch_artwork(song, cancel).await;
        }

        if cancel.is_cancelled() {
            self.undo_commit(&song.id).await;
            return Ok(AttemptEnd::Cancelled);
        }

        Ok(AttemptEnd::Committed { size_bytes })
    }

    /// Fetch and persist every listed artwork rendition, best-effort.
    ///
    /// Failures are logged and swallowed; artwork never fails a download.
    async fn fetch_artwork(&self, song: &Song, cancel: &CancellationToken) {
        for image in &song.images {
            if cancel.is_cancelled() {
                return;
            }

            match self.http.fetch_bytes(&image.url).await {
                Ok(bytes) => {
                    if let Err(e) = self
                        .store
                        .save_image_blob(&song.id, &image.quality, bytes)
                        .await
                    {
                        warn!(
                            song_id = %song.id,
                            quality = %image.quality,
                            "Failed to store artwork: {}", e
                        );
                    }
                }
                Err(e) => {
                    warn!(
                        song_id = %song.id,
                        quality = %image.quality,
                        "Failed to fetch artwork: {}", e
                    );
                }
            }
        }
    }

    /// Roll back a commit that lost the race against removal.
    async fn undo_commit(&self, id: &SongId) {
        if let Err(e) = self.store.delete_song(id).await {
            warn!(song_id = %id, "Failed to roll back cancelled download: {}", e);
        }
        self.index.mark_evicted(id);
    }

    /// Remove a song from the cache, cancelling any in-flight download.
    ///
    /// Safe on unknown ids and safe mid-download: the cancellation flag is
    /// set before the durable delete, so a racing commit backs itself out.
    #[instrument(skip(self))]
    pub async fn remove_song(&self, id: &SongId) -> Result<()> {
        if self.tasks.cancel(id).await {
            debug!("Cancelled in-flight download for song {}", id);
        }

        self.store.delete_song(id).await?;
        self.index.mark_evicted(id);
        self.emit(CoreEvent::Download(DownloadEvent::Removed {
            song_id: id.to_string(),
        }));

        info!(song_id = %id, "Removed song from cache");
        Ok(())
    }

    /// Wipe the entire cache, cancelling in-flight downloads first.
    ///
    /// Returns the number of records removed.
    #[instrument(skip(self))]
    pub async fn clear_cache(&self) -> Result<usize> {
        for task in self.tasks.active_tasks().await {
            self.tasks.cancel(&task.song_id).await;
        }

        let removed_songs = self.index.len();
        self.store.clear_all().await?;
        self.index.clear();
        self.emit(CoreEvent::Cache(CacheEvent::Cleared { removed_songs }));

        info!(removed_songs, "Cleared offline cache");
        Ok(removed_songs)
    }

    /// Current state of a download task, terminal tasks included.
    pub async fn task(&self, id: &SongId) -> Option<DownloadTask> {
        self.tasks.task(id).await
    }

    /// Snapshot of all in-flight downloads.
    pub async fn active_tasks(&self) -> Vec<DownloadTask> {
        self.tasks.active_tasks().await
    }

    /// Drop a terminal task from the registry. Returns `false` for
    /// unknown or still-active tasks.
    pub async fn dismiss_task(&self, id: &SongId) -> bool {
        self.tasks.dismiss(id).await
    }

    /// Snapshot current storage usage.
    #[instrument(skip(self))]
    pub async fn storage_budget(&self) -> Result<StorageBudget> {
        StorageBudget::compute(self.store.as_ref(), &self.index).await
    }

    fn emit(&self, event: CoreEvent) {
        if let Some(bus) = &self.events {
            bus.emit(event).ok();
        }
    }
}

impl std::fmt::Debug for DownloadPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadPipeline")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Progress percentage, `None` when the total is unknown or zero.
fn percent_of(done: u64, total: Option<u64>) -> Option<u8> {
    match total {
        Some(total) if total > 0 => Some(((done * 100) / total).min(100) as u8),
        _ => None,
    }
}
