//! Domain models for the offline media cache
//!
//! This module contains the song snapshot model and the durable cache
//! record types.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// =============================================================================
// ID Types
// =============================================================================

/// Unique identifier for a song, as issued by the remote catalog.
///
/// Catalog ids are opaque strings, not UUIDs. Ordering is total and stable
/// so timestamp ties can be broken deterministically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SongId(pub String);

impl SongId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random id, for tests and tooling.
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SongId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Quality label for a download or image variant (e.g. `"128kbps"`, `"500x500"`).
///
/// Labels are opaque; matching is exact string equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quality(pub String);

impl Quality {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Song Snapshot
// =============================================================================

/// Reference to the album a song belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlbumRef {
    /// Catalog album identifier
    pub id: String,
    /// Album display name
    pub name: String,
}

/// One artwork rendition offered by the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageVariant {
    /// Quality label
    pub quality: Quality,
    /// Fetch URL
    pub url: String,
}

/// One audio rendition offered by the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadVariant {
    /// Quality label
    pub quality: Quality,
    /// Fetch URL
    pub url: String,
}

/// Song metadata snapshot as delivered by the remote catalog.
///
/// The snapshot is persisted alongside cached audio so offline playback
/// never depends on live catalog data. Variant lists are ordered ascending
/// by quality, by catalog convention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Song {
    /// Catalog identifier
    pub id: SongId,
    /// Song title
    pub title: String,
    /// Artist display names
    pub artists: Vec<String>,
    /// Album reference
    pub album: AlbumRef,
    /// Artwork renditions, ascending quality
    pub images: Vec<ImageVariant>,
    /// Audio renditions, ascending quality
    pub downloads: Vec<DownloadVariant>,
    /// Duration in seconds
    pub duration_secs: u32,
}

impl Song {
    /// Validate song data
    pub fn validate(&self) -> Result<(), String> {
        if self.id.as_str().trim().is_empty() {
            return Err("Song id cannot be empty".to_string());
        }

        if self.title.trim().is_empty() {
            return Err("Song title cannot be empty".to_string());
        }

        Ok(())
    }

    /// Pick the audio rendition to fetch.
    ///
    /// Exact match on the preferred quality wins; otherwise the last listed
    /// variant (highest, by catalog convention). Never an arbitrary middle
    /// pick. `None` only when the catalog offered no renditions at all.
    pub fn select_download(&self, preferred: &Quality) -> Option<&DownloadVariant> {
        self.downloads
            .iter()
            .find(|v| &v.quality == preferred)
            .or_else(|| self.downloads.last())
    }

    /// Pick the artwork rendition to fetch, same rule as [`select_download`](Self::select_download).
    pub fn select_image(&self, preferred: &Quality) -> Option<&ImageVariant> {
        self.images
            .iter()
            .find(|v| &v.quality == preferred)
            .or_else(|| self.images.last())
    }

    /// Artist names joined for display
    pub fn artist_line(&self) -> String {
        self.artists.join(", ")
    }
}

// =============================================================================
// Cache Records
// =============================================================================

/// Durable audio state of a cache record.
///
/// "Has audio" is a variant, not a sentinel: an absent blob can never be
/// confused with a legitimately empty one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AudioState {
    /// Metadata snapshot only; no playable audio persisted.
    MetadataOnly,
    /// Audio blob committed.
    Cached {
        /// Committed blob length in bytes
        size_bytes: u64,
        /// SHA-256 hex digest of the committed blob
        content_sha256: String,
    },
}

impl AudioState {
    pub fn is_cached(&self) -> bool {
        matches!(self, AudioState::Cached { .. })
    }

    pub fn size_bytes(&self) -> Option<u64> {
        match self {
            AudioState::MetadataOnly => None,
            AudioState::Cached { size_bytes, .. } => Some(*size_bytes),
        }
    }
}

/// Durable record for one song.
///
/// Records exist in two shapes: metadata-only (snapshot persisted, audio
/// never committed or since removed) and fully cached. Only fully cached
/// records may ever be reported as available offline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Song snapshot at download time
    pub song: Song,
    /// Unix seconds when the record was last committed
    pub cached_at: i64,
    /// Audio state
    pub audio: AudioState,
}

impl CacheEntry {
    /// Record with a metadata snapshot and no audio.
    pub fn metadata_only(song: Song, cached_at: i64) -> Self {
        Self {
            song,
            cached_at,
            audio: AudioState::MetadataOnly,
        }
    }

    /// Record with a committed audio blob.
    pub fn cached(song: Song, cached_at: i64, size_bytes: u64, content_sha256: String) -> Self {
        Self {
            song,
            cached_at,
            audio: AudioState::Cached {
                size_bytes,
                content_sha256,
            },
        }
    }

    pub fn id(&self) -> &SongId {
        &self.song.id
    }

    pub fn is_fully_cached(&self) -> bool {
        self.audio.is_cached()
    }

    /// Degrade to metadata-only, keeping the snapshot and timestamp.
    pub fn into_metadata_only(mut self) -> Self {
        self.audio = AudioState::MetadataOnly;
        self
    }
}
