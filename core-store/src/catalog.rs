//! Remote catalog abstraction
//!
//! The catalog is an external collaborator: it owns song metadata and the
//! URLs media is fetched from. The cache core only ever needs snapshots by
//! id, so the trait stays deliberately small; hosts implement it on top of
//! their API client.

use async_trait::async_trait;
use bridge_traits::error::Result;

use crate::models::{Song, SongId};

/// Read-only access to the remote music catalog.
#[async_trait]
pub trait RemoteCatalog: Send + Sync {
    /// Fetch a song snapshot by id.
    ///
    /// # Errors
    ///
    /// Network-layer failures, including unknown ids surfacing as HTTP
    /// status errors.
    async fn song(&self, id: &SongId) -> Result<Song>;

    /// Fetch every song of an album.
    async fn album_songs(&self, album_id: &str) -> Result<Vec<Song>>;

    /// Fetch every song of a playlist.
    async fn playlist_songs(&self, playlist_id: &str) -> Result<Vec<Song>>;
}
