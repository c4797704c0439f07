//! Integration tests for the download pipeline
//!
//! These tests drive the pipeline end to end with scripted collaborators:
//! - Idempotency and per-song coalescing
//! - Commit ordering (blob, record, index) and digest stamping
//! - Bounded retry, immediate failure for non-retryable errors
//! - Cancellation via `remove_song` mid-stream
//! - Best-effort artwork and the post-commit eviction pass

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::io::{duplex, AsyncWriteExt, DuplexStream};

use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::http::{FetchedStream, HttpClient, HttpRequest, HttpResponse};
use bridge_traits::time::Clock;
use core_cache::{
    CacheConfig, CacheError, CacheIndex, DownloadOutcome, DownloadPipeline, DownloadStatus,
    Evictor,
};
use core_runtime::events::{CoreEvent, DownloadEvent, EventBus, Receiver};
use core_store::{
    AlbumRef, AudioState, CacheEntry, DownloadVariant, ImageVariant, MemoryStore,
    PersistentStore, Quality, RemoteCatalog, Song, SongId, StoreError,
};

// ============================================================================
// Scripted Collaborators
// ============================================================================

/// HTTP double serving one fixed audio payload, with failure scripting.
struct ScriptedHttpClient {
    audio: Bytes,
    announced: Option<u64>,
    transient_failures: AtomicU32,
    permanent_status: Option<u16>,
    image: Option<Bytes>,
    stream_calls: AtomicU32,
    image_calls: AtomicU32,
}

impl ScriptedHttpClient {
    fn new(audio: Bytes) -> Self {
        let announced = Some(audio.len() as u64);
        Self {
            audio,
            announced,
            transient_failures: AtomicU32::new(0),
            permanent_status: None,
            image: None,
            stream_calls: AtomicU32::new(0),
            image_calls: AtomicU32::new(0),
        }
    }

    /// Do not announce a content length.
    fn without_length(mut self) -> Self {
        self.announced = None;
        self
    }

    /// Announce this total regardless of the real payload size.
    fn announcing(mut self, total: u64) -> Self {
        self.announced = Some(total);
        self
    }

    /// Fail the first `n` stream fetches with a connect error.
    fn failing_transiently(self, n: u32) -> Self {
        self.transient_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Fail every stream fetch with this HTTP status.
    fn failing_with_status(mut self, status: u16) -> Self {
        self.permanent_status = Some(status);
        self
    }

    /// Serve this body for artwork requests (default is 404).
    fn with_image(mut self, image: Bytes) -> Self {
        self.image = Some(image);
        self
    }

    fn stream_calls(&self) -> u32 {
        self.stream_calls.load(Ordering::SeqCst)
    }

    fn image_calls(&self) -> u32 {
        self.image_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpClient for ScriptedHttpClient {
    async fn execute(&self, _request: HttpRequest) -> BridgeResult<HttpResponse> {
        self.image_calls.fetch_add(1, Ordering::SeqCst);
        match &self.image {
            Some(body) => Ok(HttpResponse {
                status: 200,
                headers: HashMap::new(),
                body: body.clone(),
            }),
            None => Ok(HttpResponse {
                status: 404,
                headers: HashMap::new(),
                body: Bytes::new(),
            }),
        }
    }

    async fn fetch_stream(&self, url: &str) -> BridgeResult<FetchedStream> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);

        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures
                .store(remaining - 1, Ordering::SeqCst);
            return Err(BridgeError::Connect(format!(
                "simulated connect failure for {}",
                url
            )));
        }

        if let Some(status) = self.permanent_status {
            return Err(BridgeError::HttpStatus {
                status,
                url: url.to_string(),
            });
        }

        Ok(FetchedStream::new(
            self.announced,
            Box::new(std::io::Cursor::new(self.audio.to_vec())),
        ))
    }
}

/// HTTP double whose streams are duplex pipes the test feeds by hand.
struct GatedHttpClient {
    streams: StdMutex<VecDeque<DuplexStream>>,
}

impl GatedHttpClient {
    fn new() -> Self {
        Self {
            streams: StdMutex::new(VecDeque::new()),
        }
    }

    /// Queue one stream; the returned half is the test's write side.
    fn push_stream(&self) -> DuplexStream {
        let (read_half, write_half) = duplex(64 * 1024);
        self.streams.lock().unwrap().push_back(read_half);
        write_half
    }
}

#[async_trait]
impl HttpClient for GatedHttpClient {
    async fn execute(&self, _request: HttpRequest) -> BridgeResult<HttpResponse> {
        Ok(HttpResponse {
            status: 404,
            headers: HashMap::new(),
            body: Bytes::new(),
        })
    }

    async fn fetch_stream(&self, _url: &str) -> BridgeResult<FetchedStream> {
        match self.streams.lock().unwrap().pop_front() {
            Some(stream) => Ok(FetchedStream::new(None, Box::new(stream))),
            None => Err(BridgeError::Connect("no scripted stream".to_string())),
        }
    }
}

/// Catalog double backed by a scripted id map.
struct ScriptedCatalog {
    songs: StdMutex<HashMap<SongId, Song>>,
    calls: AtomicU32,
}

impl ScriptedCatalog {
    fn new() -> Self {
        Self {
            songs: StdMutex::new(HashMap::new()),
            calls: AtomicU32::new(0),
        }
    }

    fn insert(&self, song: Song) {
        self.songs.lock().unwrap().insert(song.id.clone(), song);
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteCatalog for ScriptedCatalog {
    async fn song(&self, id: &SongId) -> BridgeResult<Song> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.songs
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| BridgeError::HttpStatus {
                status: 404,
                url: format!("catalog://songs/{}", id),
            })
    }

    async fn album_songs(&self, _album_id: &str) -> BridgeResult<Vec<Song>> {
        Err(BridgeError::OperationFailed("not scripted".to_string()))
    }

    async fn playlist_songs(&self, _playlist_id: &str) -> BridgeResult<Vec<Song>> {
        Err(BridgeError::OperationFailed("not scripted".to_string()))
    }
}

/// Store double that rejects record saves after a budgeted count.
struct FlakySaveStore {
    inner: MemoryStore,
    record_save_budget: AtomicU32,
}

impl FlakySaveStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            record_save_budget: AtomicU32::new(u32::MAX),
        }
    }

    /// After `n` successful `save_song` calls, further ones fail.
    fn allow_record_saves(&self, n: u32) {
        self.record_save_budget.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl PersistentStore for FlakySaveStore {
    async fn save_song(&self, entry: &CacheEntry) -> core_store::Result<()> {
        let budget = self.record_save_budget.load(Ordering::SeqCst);
        if budget == 0 {
            return Err(StoreError::Unavailable("record save rejected".to_string()));
        }
        if budget != u32::MAX {
            self.record_save_budget.store(budget - 1, Ordering::SeqCst);
        }
        self.inner.save_song(entry).await
    }

    async fn song(&self, id: &SongId) -> core_store::Result<Option<CacheEntry>> {
        self.inner.song(id).await
    }

    async fn all_songs(&self) -> core_store::Result<Vec<CacheEntry>> {
        self.inner.all_songs().await
    }

    async fn save_audio_blob(&self, id: &SongId, blob: Bytes) -> core_store::Result<()> {
        self.inner.save_audio_blob(id, blob).await
    }

    async fn audio_blob(&self, id: &SongId) -> core_store::Result<Option<Bytes>> {
        self.inner.audio_blob(id).await
    }

    async fn has_audio_blob(&self, id: &SongId) -> core_store::Result<bool> {
        self.inner.has_audio_blob(id).await
    }

    async fn save_image_blob(
        &self,
        id: &SongId,
        quality: &Quality,
        blob: Bytes,
    ) -> core_store::Result<()> {
        self.inner.save_image_blob(id, quality, blob).await
    }

    async fn image_blob(&self, id: &SongId, quality: &Quality) -> core_store::Result<Option<Bytes>> {
        self.inner.image_blob(id, quality).await
    }

    async fn storage_size(&self) -> core_store::Result<u64> {
        self.inner.storage_size().await
    }

    async fn quota_bytes(&self) -> core_store::Result<Option<u64>> {
        self.inner.quota_bytes().await
    }

    async fn delete_song(&self, id: &SongId) -> core_store::Result<()> {
        self.inner.delete_song(id).await
    }

    async fn clear_all(&self) -> core_store::Result<()> {
        self.inner.clear_all().await
    }
}

/// Deterministic time source.
struct ManualClock {
    secs: AtomicI64,
}

impl ManualClock {
    fn new(secs: i64) -> Self {
        Self {
            secs: AtomicI64::new(secs),
        }
    }

    fn advance(&self, delta: i64) {
        self.secs.fetch_add(delta, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.secs.load(Ordering::SeqCst), 0).unwrap()
    }
}

// ============================================================================
// Fixture
// ============================================================================

struct Rig {
    store: Arc<dyn PersistentStore>,
    index: Arc<CacheIndex>,
    catalog: Arc<ScriptedCatalog>,
    clock: Arc<ManualClock>,
    bus: Arc<EventBus>,
    pipeline: Arc<DownloadPipeline>,
}

async fn rig_with(
    store: Arc<dyn PersistentStore>,
    http: Arc<dyn HttpClient>,
    config: CacheConfig,
) -> Rig {
    let index = Arc::new(CacheIndex::rebuild(store.as_ref()).await.unwrap());
    let bus = Arc::new(EventBus::new(256));
    let evictor = Arc::new(
        Evictor::new(config.clone(), store.clone(), index.clone()).with_event_bus(bus.clone()),
    );
    let catalog = Arc::new(ScriptedCatalog::new());
    let clock = Arc::new(ManualClock::new(1_000));

    let pipeline = Arc::new(
        DownloadPipeline::new(
            config,
            store.clone(),
            catalog.clone(),
            http,
            clock.clone(),
            index.clone(),
            evictor,
        )
        .unwrap()
        .with_event_bus(bus.clone()),
    );

    Rig {
        store,
        index,
        catalog,
        clock,
        bus,
        pipeline,
    }
}

fn fast_config() -> CacheConfig {
    CacheConfig::default().with_retry_base_delay(Duration::from_millis(1))
}

fn make_song(id: &str) -> Song {
    Song {
        id: SongId::new(id),
        title: format!("Song {}", id),
        artists: vec!["Tester".to_string()],
        album: AlbumRef {
            id: "album-1".to_string(),
            name: "Test Album".to_string(),
        },
        images: vec![ImageVariant {
            quality: Quality::new("150x150"),
            url: format!("https://img.example.com/{}/150.jpg", id),
        }],
        downloads: vec![DownloadVariant {
            quality: Quality::new("128kbps"),
            url: format!("https://cdn.example.com/{}/128.mp3", id),
        }],
        duration_secs: 180,
    }
}

fn song_without_variants(id: &str) -> Song {
    let mut song = make_song(id);
    song.downloads.clear();
    song.images.clear();
    song
}

fn song_with_artwork(id: &str) -> Song {
    let mut song = make_song(id);
    song.images = vec![
        ImageVariant {
            quality: Quality::new("150x150"),
            url: format!("https://img.example.com/{}/150.jpg", id),
        },
        ImageVariant {
            quality: Quality::new("500x500"),
            url: format!("https://img.example.com/{}/500.jpg", id),
        },
    ];
    song
}

async fn await_event<F>(events: &mut Receiver<CoreEvent>, pred: F) -> CoreEvent
where
    F: Fn(&CoreEvent) -> bool,
{
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event bus closed");
        if pred(&event) {
            return event;
        }
    }
}

fn drain_events(events: &mut Receiver<CoreEvent>) -> Vec<CoreEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// Happy Path
// ============================================================================

#[tokio::test]
async fn download_commits_blob_record_and_index() {
    let payload = Bytes::from(vec![42u8; 500]);
    let http = Arc::new(ScriptedHttpClient::new(payload.clone()));
    let rig = rig_with(Arc::new(MemoryStore::new()), http.clone(), fast_config()).await;
    let mut events = rig.bus.subscribe();
    let song = make_song("a");

    let outcome = rig.pipeline.download_song(&song).await.unwrap();
    assert_eq!(
        outcome,
        DownloadOutcome::Completed {
            size_bytes: 500,
            attempts: 1
        }
    );

    // Durable record carries the streamed digest and the clock's stamp.
    let entry = rig.store.song(&song.id).await.unwrap().unwrap();
    assert_eq!(entry.cached_at, 1_000);
    assert_eq!(
        entry.audio,
        AudioState::Cached {
            size_bytes: 500,
            content_sha256: sha256_hex(&payload),
        }
    );
    assert_eq!(
        rig.store.audio_blob(&song.id).await.unwrap().unwrap(),
        payload
    );
    assert!(rig.index.has(&song.id));
    assert!(rig.pipeline.is_cached(&song.id));

    // Lifecycle events arrive in commit order.
    let all = drain_events(&mut events);
    assert!(matches!(
        all.first(),
        Some(CoreEvent::Download(DownloadEvent::Started { .. }))
    ));
    assert!(matches!(
        all.last(),
        Some(CoreEvent::Download(DownloadEvent::Completed {
            size_bytes: 500,
            attempts: 1,
            ..
        }))
    ));
    let final_percent = all
        .iter()
        .rev()
        .find_map(|event| match event {
            CoreEvent::Download(DownloadEvent::Progress { percent, .. }) => Some(*percent),
            _ => None,
        })
        .unwrap();
    assert_eq!(final_percent, Some(100));

    // Task settled.
    let task = rig.pipeline.task(&song.id).await.unwrap();
    assert_eq!(task.status, DownloadStatus::Completed);
    assert!(rig.pipeline.active_tasks().await.is_empty());
}

#[tokio::test]
async fn download_is_idempotent_once_cached() {
    let http = Arc::new(ScriptedHttpClient::new(Bytes::from_static(b"audio")));
    let rig = rig_with(Arc::new(MemoryStore::new()), http.clone(), fast_config()).await;
    let song = make_song("a");

    rig.pipeline.download_song(&song).await.unwrap();
    assert_eq!(
        rig.pipeline.download_song(&song).await.unwrap(),
        DownloadOutcome::AlreadyCached
    );
    assert_eq!(http.stream_calls(), 1);

    // The by-id path short-circuits before touching the catalog.
    assert_eq!(
        rig.pipeline.download_by_id(&song.id).await.unwrap(),
        DownloadOutcome::AlreadyCached
    );
    assert_eq!(rig.catalog.calls(), 0);
}

#[tokio::test]
async fn concurrent_download_requests_coalesce() {
    let http = Arc::new(GatedHttpClient::new());
    let mut writer = http.push_stream();
    let rig = rig_with(Arc::new(MemoryStore::new()), http.clone(), fast_config()).await;
    let mut events = rig.bus.subscribe();
    let song = make_song("a");

    let pipeline = rig.pipeline.clone();
    let in_flight = song.clone();
    let handle = tokio::spawn(async move { pipeline.download_song(&in_flight).await });

    // Once Started is out, the task slot is claimed.
    await_event(&mut events, |event| {
        matches!(event, CoreEvent::Download(DownloadEvent::Started { .. }))
    })
    .await;
    assert_eq!(
        rig.pipeline.download_song(&song).await.unwrap(),
        DownloadOutcome::AlreadyInFlight
    );

    writer.write_all(b"payload-bytes").await.unwrap();
    drop(writer);

    let outcome = handle.await.unwrap().unwrap();
    assert!(matches!(
        outcome,
        DownloadOutcome::Completed { attempts: 1, .. }
    ));
    assert!(rig.index.has(&song.id));
}

// ============================================================================
// Retry and Failure
// ============================================================================

#[tokio::test]
async fn transient_failures_retry_until_success() {
    let payload = Bytes::from(vec![7u8; 100]);
    let http = Arc::new(ScriptedHttpClient::new(payload.clone()).failing_transiently(2));
    let rig = rig_with(Arc::new(MemoryStore::new()), http.clone(), fast_config()).await;
    let song = make_song("a");

    let outcome = rig.pipeline.download_song(&song).await.unwrap();
    assert_eq!(
        outcome,
        DownloadOutcome::Completed {
            size_bytes: 100,
            attempts: 3
        }
    );
    assert_eq!(http.stream_calls(), 3);
    assert_eq!(
        rig.store.audio_blob(&song.id).await.unwrap().unwrap(),
        payload
    );
}

#[tokio::test]
async fn retry_budget_exhaustion_fails_task_but_keeps_snapshot() {
    let http =
        Arc::new(ScriptedHttpClient::new(Bytes::from_static(b"unreached")).failing_transiently(10));
    let rig = rig_with(Arc::new(MemoryStore::new()), http.clone(), fast_config()).await;
    let mut events = rig.bus.subscribe();
    let song = make_song("a");

    let err = rig.pipeline.download_song(&song).await.unwrap_err();
    match err {
        CacheError::DownloadFailed { attempts, message } => {
            assert_eq!(attempts, 3);
            assert!(message.contains("connect failure"));
        }
        other => panic!("expected DownloadFailed, got {:?}", other),
    }
    assert_eq!(http.stream_calls(), 3);

    // The metadata snapshot survives; nothing claims audio.
    let entry = rig.store.song(&song.id).await.unwrap().unwrap();
    assert!(!entry.is_fully_cached());
    assert!(rig.store.audio_blob(&song.id).await.unwrap().is_none());
    assert!(!rig.index.has(&song.id));

    let task = rig.pipeline.task(&song.id).await.unwrap();
    assert_eq!(task.status, DownloadStatus::Failed);
    assert!(task.error.is_some());

    let failed = await_event(&mut events, |event| {
        matches!(event, CoreEvent::Download(DownloadEvent::Failed { .. }))
    })
    .await;
    assert!(matches!(
        failed,
        CoreEvent::Download(DownloadEvent::Failed { attempts: 3, .. })
    ));

    // Terminal tasks can be dismissed exactly once.
    assert!(rig.pipeline.dismiss_task(&song.id).await);
    assert!(rig.pipeline.task(&song.id).await.is_none());
    assert!(!rig.pipeline.dismiss_task(&song.id).await);
}

#[tokio::test]
async fn client_error_fails_without_retry() {
    let http =
        Arc::new(ScriptedHttpClient::new(Bytes::from_static(b"unreached")).failing_with_status(404));
    let rig = rig_with(Arc::new(MemoryStore::new()), http.clone(), fast_config()).await;
    let song = make_song("a");

    let err = rig.pipeline.download_song(&song).await.unwrap_err();
    assert!(matches!(
        err,
        CacheError::Network(BridgeError::HttpStatus { status: 404, .. })
    ));
    assert_eq!(http.stream_calls(), 1);
}

#[tokio::test]
async fn no_variants_fails_before_any_network_traffic() {
    let http = Arc::new(ScriptedHttpClient::new(Bytes::from_static(b"unreached")));
    let rig = rig_with(Arc::new(MemoryStore::new()), http.clone(), fast_config()).await;
    let mut events = rig.bus.subscribe();
    let song = song_without_variants("a");

    let err = rig.pipeline.download_song(&song).await.unwrap_err();
    assert!(matches!(err, CacheError::NoVariants(_)));
    assert_eq!(http.stream_calls(), 0);

    // Nothing was persisted, not even the snapshot.
    assert!(rig.store.song(&song.id).await.unwrap().is_none());

    let task = rig.pipeline.task(&song.id).await.unwrap();
    assert_eq!(task.status, DownloadStatus::Failed);

    let failed = await_event(&mut events, |event| {
        matches!(event, CoreEvent::Download(DownloadEvent::Failed { .. }))
    })
    .await;
    assert!(matches!(
        failed,
        CoreEvent::Download(DownloadEvent::Failed { attempts: 0, .. })
    ));
}

#[tokio::test]
async fn audio_commit_failure_fails_download() {
    let payload = Bytes::from(vec![1u8; 500]);
    let http = Arc::new(ScriptedHttpClient::new(payload));
    // Records bypass the quota; only the blob write can fail.
    let rig = rig_with(Arc::new(MemoryStore::with_quota(100)), http, fast_config()).await;
    let song = make_song("a");

    let err = rig.pipeline.download_song(&song).await.unwrap_err();
    assert!(matches!(
        err,
        CacheError::Store(StoreError::QuotaExceeded { .. })
    ));

    assert!(rig.store.audio_blob(&song.id).await.unwrap().is_none());
    assert!(!rig.index.has(&song.id));
    // The snapshot from task start is still there.
    let entry = rig.store.song(&song.id).await.unwrap().unwrap();
    assert!(!entry.is_fully_cached());
}

#[tokio::test]
async fn record_upgrade_failure_rolls_back_blob() {
    let flaky = Arc::new(FlakySaveStore::new());
    flaky.allow_record_saves(1); // the metadata-only save at task start
    let http = Arc::new(ScriptedHttpClient::new(Bytes::from_static(b"audio-bytes")));
    let rig = rig_with(flaky.clone(), http, fast_config()).await;
    let song = make_song("a");

    let err = rig.pipeline.download_song(&song).await.unwrap_err();
    assert!(matches!(
        err,
        CacheError::Store(StoreError::Unavailable(_))
    ));

    // The committed blob was pulled back out; the index never heard of it.
    assert!(rig.store.audio_blob(&song.id).await.unwrap().is_none());
    assert!(!rig.index.has(&song.id));
    let task = rig.pipeline.task(&song.id).await.unwrap();
    assert_eq!(task.status, DownloadStatus::Failed);
}

#[tokio::test]
async fn unknown_total_reports_indeterminate_progress() {
    let http = Arc::new(ScriptedHttpClient::new(Bytes::from(vec![9u8; 300])).without_length());
    let rig = rig_with(Arc::new(MemoryStore::new()), http, fast_config()).await;
    let mut events = rig.bus.subscribe();
    let song = make_song("a");

    let outcome = rig.pipeline.download_song(&song).await.unwrap();
    assert!(matches!(outcome, DownloadOutcome::Completed { .. }));

    let progress: Vec<_> = drain_events(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            CoreEvent::Download(DownloadEvent::Progress {
                total_bytes,
                percent,
                ..
            }) => Some((total_bytes, percent)),
            _ => None,
        })
        .collect();
    assert!(!progress.is_empty());
    for (total_bytes, percent) in progress {
        assert_eq!(total_bytes, None);
        assert_eq!(percent, None);
    }
}

#[tokio::test]
async fn truncated_stream_fails_after_retries() {
    let payload = Bytes::from(vec![3u8; 100]);
    let announced = payload.len() as u64 * 2;
    let http = Arc::new(ScriptedHttpClient::new(payload).announcing(announced));
    let rig = rig_with(Arc::new(MemoryStore::new()), http.clone(), fast_config()).await;
    let song = make_song("a");

    let err = rig.pipeline.download_song(&song).await.unwrap_err();
    match err {
        CacheError::DownloadFailed { attempts, message } => {
            assert_eq!(attempts, 3);
            assert!(message.contains("truncated"));
        }
        other => panic!("expected DownloadFailed, got {:?}", other),
    }
    assert_eq!(http.stream_calls(), 3);
    assert!(rig.store.audio_blob(&song.id).await.unwrap().is_none());
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn remove_song_cancels_in_flight_download() {
    let http = Arc::new(GatedHttpClient::new());
    let mut writer = http.push_stream();
    let rig = rig_with(Arc::new(MemoryStore::new()), http, fast_config()).await;
    let mut events = rig.bus.subscribe();
    let song = make_song("a");

    let pipeline = rig.pipeline.clone();
    let in_flight = song.clone();
    let handle = tokio::spawn(async move { pipeline.download_song(&in_flight).await });

    // Feed one chunk and wait until the pipeline has consumed it.
    writer.write_all(b"first-chunk").await.unwrap();
    await_event(&mut events, |event| {
        matches!(event, CoreEvent::Download(DownloadEvent::Progress { .. }))
    })
    .await;

    rig.pipeline.remove_song(&song.id).await.unwrap();
    drop(writer); // stream ends; the racing commit must back itself out

    let outcome = handle.await.unwrap().unwrap();
    assert_eq!(outcome, DownloadOutcome::Cancelled);

    assert!(rig.store.song(&song.id).await.unwrap().is_none());
    assert!(rig.store.audio_blob(&song.id).await.unwrap().is_none());
    assert!(!rig.index.has(&song.id));

    let task = rig.pipeline.task(&song.id).await.unwrap();
    assert_eq!(task.status, DownloadStatus::Failed);
    assert!(task.error.unwrap().contains("cancelled"));

    // Removed was announced; neither Completed nor Failed ever fired.
    let rest = drain_events(&mut events);
    assert!(rest
        .iter()
        .any(|event| matches!(event, CoreEvent::Download(DownloadEvent::Removed { .. }))));
    assert!(!rest.iter().any(|event| matches!(
        event,
        CoreEvent::Download(DownloadEvent::Completed { .. })
            | CoreEvent::Download(DownloadEvent::Failed { .. })
    )));
}

#[tokio::test]
async fn remove_song_is_safe_on_unknown_ids() {
    let http = Arc::new(ScriptedHttpClient::new(Bytes::from_static(b"audio")));
    let rig = rig_with(Arc::new(MemoryStore::new()), http, fast_config()).await;

    rig.pipeline.remove_song(&SongId::new("never-seen")).await.unwrap();
}

#[tokio::test]
async fn remove_song_deletes_cached_song() {
    let http = Arc::new(ScriptedHttpClient::new(Bytes::from_static(b"audio")));
    let rig = rig_with(Arc::new(MemoryStore::new()), http, fast_config()).await;
    let song = make_song("a");

    rig.pipeline.download_song(&song).await.unwrap();
    assert!(rig.index.has(&song.id));

    rig.pipeline.remove_song(&song.id).await.unwrap();
    assert!(rig.store.song(&song.id).await.unwrap().is_none());
    assert!(rig.store.audio_blob(&song.id).await.unwrap().is_none());
    assert!(!rig.index.has(&song.id));
}

// ============================================================================
// Catalog Path
// ============================================================================

#[tokio::test]
async fn download_by_id_resolves_through_catalog() {
    let http = Arc::new(ScriptedHttpClient::new(Bytes::from_static(b"audio")));
    let rig = rig_with(Arc::new(MemoryStore::new()), http, fast_config()).await;
    rig.catalog.insert(make_song("a"));

    let outcome = rig.pipeline.download_by_id(&SongId::new("a")).await.unwrap();
    assert!(matches!(outcome, DownloadOutcome::Completed { .. }));
    assert_eq!(rig.catalog.calls(), 1);

    // Cached now, so the catalog is not consulted again.
    let outcome = rig.pipeline.download_by_id(&SongId::new("a")).await.unwrap();
    assert_eq!(outcome, DownloadOutcome::AlreadyCached);
    assert_eq!(rig.catalog.calls(), 1);
}

#[tokio::test]
async fn download_by_id_propagates_catalog_miss() {
    let http = Arc::new(ScriptedHttpClient::new(Bytes::from_static(b"audio")));
    let rig = rig_with(Arc::new(MemoryStore::new()), http, fast_config()).await;

    let err = rig
        .pipeline
        .download_by_id(&SongId::new("missing"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CacheError::Network(BridgeError::HttpStatus { status: 404, .. })
    ));
    // No task was ever claimed for the unknown id.
    assert!(rig.pipeline.task(&SongId::new("missing")).await.is_none());
}

// ============================================================================
// Wipe, Eviction Hook, Budget
// ============================================================================

#[tokio::test]
async fn clear_cache_wipes_store_and_index() {
    let http = Arc::new(ScriptedHttpClient::new(Bytes::from_static(b"audio")));
    let rig = rig_with(Arc::new(MemoryStore::new()), http, fast_config()).await;
    let mut events = rig.bus.subscribe();

    rig.pipeline.download_song(&make_song("a")).await.unwrap();
    rig.pipeline.download_song(&make_song("b")).await.unwrap();

    let removed = rig.pipeline.clear_cache().await.unwrap();
    assert_eq!(removed, 2);
    assert!(rig.store.all_songs().await.unwrap().is_empty());
    assert_eq!(rig.store.storage_size().await.unwrap(), 0);
    assert!(rig.index.is_empty());

    let cleared = await_event(&mut events, |event| {
        matches!(event, CoreEvent::Cache(_))
    })
    .await;
    assert!(matches!(
        cleared,
        CoreEvent::Cache(core_runtime::events::CacheEvent::Cleared { removed_songs: 2 })
    ));
}

#[tokio::test]
async fn successful_download_evicts_oldest_over_ceiling() {
    let payload = Bytes::from(vec![5u8; 500]);
    let http = Arc::new(ScriptedHttpClient::new(payload));
    let config = fast_config().with_max_size(600);
    let rig = rig_with(Arc::new(MemoryStore::new()), http, config).await;
    let mut events = rig.bus.subscribe();

    rig.pipeline.download_song(&make_song("a")).await.unwrap();
    rig.clock.advance(60);
    rig.pipeline.download_song(&make_song("b")).await.unwrap();

    // The pass runs before download_song returns, so this is already settled.
    assert!(!rig.index.has(&SongId::new("a")));
    assert!(rig.index.has(&SongId::new("b")));
    assert!(rig.store.song(&SongId::new("a")).await.unwrap().is_none());
    assert_eq!(rig.store.storage_size().await.unwrap(), 500);

    // A fresh budget already accounts for the evicted song.
    let budget = rig.pipeline.storage_budget().await.unwrap();
    assert_eq!(budget.used_bytes, 500);
    assert_eq!(budget.song_count, 1);

    let evicted = await_event(&mut events, |event| {
        matches!(
            event,
            CoreEvent::Cache(core_runtime::events::CacheEvent::Evicted { .. })
        )
    })
    .await;
    match evicted {
        CoreEvent::Cache(core_runtime::events::CacheEvent::Evicted {
            song_id,
            freed_bytes,
        }) => {
            assert_eq!(song_id, "a");
            assert_eq!(freed_bytes, 500);
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn storage_budget_reflects_cache_contents() {
    let http = Arc::new(ScriptedHttpClient::new(Bytes::from(vec![8u8; 500])));
    let rig = rig_with(Arc::new(MemoryStore::with_quota(10_000)), http, fast_config()).await;

    rig.pipeline.download_song(&make_song("a")).await.unwrap();

    let budget = rig.pipeline.storage_budget().await.unwrap();
    assert_eq!(budget.used_bytes, 500);
    assert_eq!(budget.quota_bytes, Some(10_000));
    assert_eq!(budget.song_count, 1);
    assert_eq!(budget.usage_percentage(), Some(5.0));
}

// ============================================================================
// Artwork
// ============================================================================

#[tokio::test]
async fn artwork_is_persisted_alongside_audio() {
    let image = Bytes::from(vec![2u8; 40]);
    let http = Arc::new(
        ScriptedHttpClient::new(Bytes::from(vec![1u8; 500])).with_image(image.clone()),
    );
    let rig = rig_with(Arc::new(MemoryStore::new()), http.clone(), fast_config()).await;
    let song = song_with_artwork("a");

    rig.pipeline.download_song(&song).await.unwrap();

    assert_eq!(http.image_calls(), 2);
    assert_eq!(
        rig.store
            .image_blob(&song.id, &Quality::new("150x150"))
            .await
            .unwrap()
            .unwrap(),
        image
    );
    assert_eq!(
        rig.store
            .image_blob(&song.id, &Quality::new("500x500"))
            .await
            .unwrap()
            .unwrap(),
        image
    );
    assert_eq!(rig.store.storage_size().await.unwrap(), 500 + 80);
}

#[tokio::test]
async fn artwork_failure_does_not_fail_download() {
    // Default scripted client serves 404 for artwork.
    let http = Arc::new(ScriptedHttpClient::new(Bytes::from_static(b"audio")));
    let rig = rig_with(Arc::new(MemoryStore::new()), http, fast_config()).await;
    let song = make_song("a");

    let outcome = rig.pipeline.download_song(&song).await.unwrap();
    assert!(matches!(outcome, DownloadOutcome::Completed { .. }));
    assert!(rig.index.has(&song.id));
    assert!(rig
        .store
        .image_blob(&song.id, &Quality::new("150x150"))
        .await
        .unwrap()
        .is_none());
}
