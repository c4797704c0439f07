//! # Event Bus System
//!
//! Event-driven notifications for the offline cache core using
//! `tokio::sync::broadcast`. State readers subscribe to the bus instead of
//! polling the pipeline, so progress and eviction updates reach the UI
//! without coupling it to cache internals.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     emit      ┌───────────┐
//! │ Download     ├──────────────>│           │
//! │ Pipeline     │               │           │
//! └──────────────┘               │ EventBus  │
//! ┌──────────────┐     emit      │ (broadcast│     subscribe    ┌────────────┐
//! │ Evictor      ├──────────────>│  channel) ├─────────────────>│ UI reader  │
//! └──────────────┘               │           │                  └────────────┘
//! ┌──────────────┐     emit      │           │     subscribe    ┌────────────┐
//! │ Resolver /   ├──────────────>│           ├─────────────────>│ Logger     │
//! │ Offline mode │               └───────────┘                  └────────────┘
//! └──────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CacheEvent, CoreEvent, EventBus};
//!
//! let event_bus = EventBus::new(100);
//! let mut updates = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Cache(CacheEvent::Evicted {
//!         song_id: "song-1".to_string(),
//!         freed_bytes: 4_200_000,
//!     }))
//!     .ok();
//! ```
//!
//! ## Error Handling
//!
//! `broadcast` produces two receive errors: `RecvError::Lagged(n)` (the
//! subscriber missed `n` events; non-fatal, keep receiving) and
//! `RecvError::Closed` (all senders dropped; shut down). Events are cloned
//! per subscriber, so payloads stay lightweight: ids and counters, never
//! blobs.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

// Re-export commonly used types
pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// Progress events dominate the volume; at one update per streamed chunk a
/// burst of a few dozen is normal, so a small three-digit buffer is plenty.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Download lifecycle events
    Download(DownloadEvent),
    /// Cache content events (eviction, healing, wipes)
    Cache(CacheEvent),
    /// Playback source resolution events
    Playback(PlaybackEvent),
    /// Offline mode transitions
    Offline(OfflineEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Download(e) => e.description(),
            CoreEvent::Cache(e) => e.description(),
            CoreEvent::Playback(e) => e.description(),
            CoreEvent::Offline(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Download(DownloadEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Playback(PlaybackEvent::QueueUnavailable { .. }) => EventSeverity::Warning,
            CoreEvent::Cache(CacheEvent::Healed { .. }) => EventSeverity::Warning,
            CoreEvent::Download(DownloadEvent::Completed { .. }) => EventSeverity::Info,
            CoreEvent::Cache(CacheEvent::Evicted { .. }) => EventSeverity::Info,
            CoreEvent::Cache(CacheEvent::Cleared { .. }) => EventSeverity::Info,
            CoreEvent::Offline(_) => EventSeverity::Info,
            CoreEvent::Playback(PlaybackEvent::SkippedUnavailable { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    /// Debug-level events (verbose)
    Debug,
    /// Informational events
    Info,
    /// Warning events
    Warning,
    /// Error events
    Error,
}

// ============================================================================
// Download Events
// ============================================================================

/// Events emitted by the download pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum DownloadEvent {
    /// A download left the pending state and started streaming.
    Started {
        /// The song being fetched.
        song_id: String,
        /// Song title for display.
        title: String,
        /// Quality label of the chosen rendition.
        quality: String,
        /// Total bytes if the server sent a content length.
        total_bytes: Option<u64>,
    },
    /// Incremental progress update.
    Progress {
        /// The song being fetched.
        song_id: String,
        /// Bytes received so far.
        bytes_downloaded: u64,
        /// Total bytes if known; `None` means indeterminate progress.
        total_bytes: Option<u64>,
        /// Progress percentage (0-100) when the total is known.
        percent: Option<u8>,
    },
    /// Audio committed durably; the song is now available offline.
    Completed {
        /// The cached song.
        song_id: String,
        /// Committed audio size in bytes.
        size_bytes: u64,
        /// Attempts it took, including the successful one.
        attempts: u32,
    },
    /// All attempts exhausted; nothing was persisted beyond the metadata
    /// snapshot.
    Failed {
        /// The song that failed.
        song_id: String,
        /// Human-readable error message.
        message: String,
        /// Attempts made.
        attempts: u32,
    },
    /// A song was removed from the cache on request.
    Removed {
        /// The removed song.
        song_id: String,
    },
}

impl DownloadEvent {
    fn description(&self) -> &str {
        match self {
            DownloadEvent::Started { .. } => "Download started",
            DownloadEvent::Progress { .. } => "Download in progress",
            DownloadEvent::Completed { .. } => "Download completed",
            DownloadEvent::Failed { .. } => "Download failed",
            DownloadEvent::Removed { .. } => "Song removed from cache",
        }
    }
}

// ============================================================================
// Cache Events
// ============================================================================

/// Events describing cache content changes outside explicit downloads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum CacheEvent {
    /// A song was evicted to reclaim space.
    Evicted {
        /// The evicted song.
        song_id: String,
        /// Bytes reclaimed.
        freed_bytes: u64,
    },
    /// An inconsistent record was degraded to metadata-only.
    Healed {
        /// The affected song.
        song_id: String,
        /// What was wrong (e.g., blob missing, digest mismatch).
        detail: String,
    },
    /// The entire cache was wiped.
    Cleared {
        /// Songs removed by the wipe.
        removed_songs: usize,
    },
}

impl CacheEvent {
    fn description(&self) -> &str {
        match self {
            CacheEvent::Evicted { .. } => "Song evicted from cache",
            CacheEvent::Healed { .. } => "Inconsistent cache record healed",
            CacheEvent::Cleared { .. } => "Cache cleared",
        }
    }
}

// ============================================================================
// Playback Events
// ============================================================================

/// Events emitted during playback source resolution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum PlaybackEvent {
    /// An unavailable song was skipped while advancing through the queue.
    /// Emitted exactly once per skipped song.
    SkippedUnavailable {
        /// The skipped song.
        song_id: String,
        /// Song title for the notification.
        title: String,
    },
    /// A full pass over the queue found nothing playable.
    QueueUnavailable {
        /// Songs skipped during the pass.
        skipped: usize,
    },
}

impl PlaybackEvent {
    fn description(&self) -> &str {
        match self {
            PlaybackEvent::SkippedUnavailable { .. } => "Skipped unavailable song",
            PlaybackEvent::QueueUnavailable { .. } => "No playable song in queue",
        }
    }
}

// ============================================================================
// Offline Mode Events
// ============================================================================

/// Offline mode transitions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum OfflineEvent {
    /// Effective offline state changed.
    ModeChanged {
        /// Whether the player is now offline.
        offline: bool,
        /// Whether a user override (not reachability) decided it.
        forced: bool,
    },
}

impl OfflineEvent {
    fn description(&self) -> &str {
        match self {
            OfflineEvent::ModeChanged { .. } => "Offline mode changed",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
///
/// Uses `tokio::sync::broadcast` internally, which provides:
/// - Multiple producers (clone the `EventBus`)
/// - Multiple consumers (each `subscribe()` creates a new receiver)
/// - Non-blocking sends (events are cloned for each subscriber)
/// - Lagging detection (slow subscribers get `RecvError::Lagged`)
///
/// # Example
///
/// ```rust
/// use core_runtime::events::{CoreEvent, DownloadEvent, EventBus};
///
/// # #[tokio::main]
/// # async fn main() {
/// let event_bus = EventBus::new(100);
/// let mut subscriber = event_bus.subscribe();
///
/// event_bus
///     .emit(CoreEvent::Download(DownloadEvent::Removed {
///         song_id: "song-1".to_string(),
///     }))
///     .ok();
/// # }
/// ```
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    ///
    /// `capacity` is the maximum number of events buffered per subscriber;
    /// a subscriber that falls further behind receives `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Creates a new event bus with the default buffer size.
    #[allow(clippy::should_implement_trait)]
    pub fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an
    /// error when there are none. Emitters treat that error as "nobody is
    /// listening" and drop it.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber to receive events.
    ///
    /// Each call creates an independent receiver that will receive all
    /// future events. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

/// Type alias for event filter functions.
type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with additional filtering.
///
/// # Example
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let event_bus = EventBus::new(100);
/// let mut downloads = EventStream::new(event_bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Download(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    /// Creates a new event stream from a receiver.
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Adds a filter function to this stream.
    ///
    /// Only events that match the filter will be returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    /// Receives the next event that passes the filter (if any).
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n`
    /// events, `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;

            let Some(filter) = &self.filter else {
                return Ok(event);
            };

            if filter(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive an event without blocking.
    ///
    /// Returns `None` if no matching event is currently available.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    let Some(filter) = &self.filter else {
                        return Some(Ok(event));
                    };

                    if filter(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
