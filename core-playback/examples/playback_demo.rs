//! # Playback Source Resolution Demo
//!
//! Wires a seeded in-memory store, the cache index, offline mode, and the
//! source resolver together, then walks through the resolution order:
//! cached blob first, remote URL online, unavailable offline.
//!
//! Run with: `cargo run --example playback_demo --package core-playback`

use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};

use bridge_traits::error::Result as BridgeResult;
use bridge_traits::network::{NetworkChangeStream, NetworkMonitor, NetworkStatus};
use core_cache::{CacheConfig, CacheIndex};
use core_playback::{OfflineModeController, ResolvedSource, SourceResolver};
use core_runtime::events::{CoreEvent, EventBus, PlaybackEvent};
use core_store::{
    AlbumRef, CacheEntry, DownloadVariant, ImageVariant, MemoryStore, PersistentStore, Quality,
    Song, SongId,
};

// ============================================================================
// Inline Reachability Double (for demonstration)
// ============================================================================

struct AlwaysOnline;

#[async_trait]
impl NetworkMonitor for AlwaysOnline {
    async fn status(&self) -> NetworkStatus {
        NetworkStatus::Connected
    }

    async fn subscribe_changes(&self) -> BridgeResult<Box<dyn NetworkChangeStream>> {
        Ok(Box::new(NoChanges))
    }
}

struct NoChanges;

#[async_trait]
impl NetworkChangeStream for NoChanges {
    async fn next(&mut self) -> Option<NetworkStatus> {
        None
    }
}

// ============================================================================
// Fixture Data
// ============================================================================

fn make_song(id: &str, title: &str) -> Song {
    Song {
        id: SongId::new(id),
        title: title.to_string(),
        artists: vec!["Demo Artist".to_string()],
        album: AlbumRef {
            id: "album-demo".to_string(),
            name: "Demo Album".to_string(),
        },
        images: vec![ImageVariant {
            quality: Quality::new("150x150"),
            url: format!("https://img.example.com/{}/150.jpg", id),
        }],
        downloads: vec![DownloadVariant {
            quality: Quality::new("128kbps"),
            url: format!("https://cdn.example.com/{}/128.mp3", id),
        }],
        duration_secs: 200,
    }
}

async fn seed_cached(store: &dyn PersistentStore, song: &Song, payload: Bytes) {
    let mut hasher = Sha256::new();
    hasher.update(&payload);
    let digest = format!("{:x}", hasher.finalize());

    let entry = CacheEntry::cached(song.clone(), 1_724_000_000, payload.len() as u64, digest);
    store.save_song(&entry).await.expect("seed record");
    store
        .save_audio_blob(&song.id, payload)
        .await
        .expect("seed blob");
}

// ============================================================================
// Main Demo
// ============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    println!("🎵 Playback Source Resolution Demo\n");

    // One song durably cached, two that only exist remotely.
    let store: Arc<dyn PersistentStore> = Arc::new(MemoryStore::new());
    let cached = make_song("song-cached", "Already Downloaded");
    let remote = make_song("song-remote", "Streams From The CDN");
    let another = make_song("song-other", "Also Remote Only");
    seed_cached(store.as_ref(), &cached, Bytes::from(vec![7u8; 131_072])).await;

    let index = Arc::new(CacheIndex::rebuild(store.as_ref()).await?);
    println!("📦 Index rebuilt: {} cached song(s)", index.cached_count());

    let bus = Arc::new(EventBus::new(64));
    let offline = Arc::new(
        OfflineModeController::new(Arc::new(AlwaysOnline)).with_event_bus(bus.clone()),
    );
    offline.start().await?;

    let resolver = SourceResolver::new(
        CacheConfig::default(),
        store.clone(),
        index.clone(),
        offline.clone(),
    )
    .with_event_bus(bus.clone());

    // Cached song: served from the local blob under a lease.
    println!("\n▶️  Resolving \"{}\"...", cached.title);
    match resolver.resolve(&cached).await {
        ResolvedSource::Cached { handle } => {
            println!("   Cached blob, {} bytes", handle.len());
            println!("   Live handles: {}", resolver.live_handles());
            handle.release();
        }
        other => println!("   Unexpected source: {:?}", other),
    }

    // Uncached song while online: remote stream at the preferred quality.
    println!("\n▶️  Resolving \"{}\"...", remote.title);
    match resolver.resolve(&remote).await {
        ResolvedSource::Remote { url, quality } => {
            println!("   Remote stream at {}: {}", quality, url);
        }
        other => println!("   Unexpected source: {:?}", other),
    }

    // Forced offline: the same song is now unavailable.
    println!("\n✈️  Forcing offline mode...");
    offline.force_offline(true);
    resolver.reset();
    println!("   Offline: {}", offline.is_offline());

    match resolver.resolve(&remote).await {
        ResolvedSource::Unavailable => println!("   \"{}\" is unavailable offline", remote.title),
        other => println!("   Unexpected source: {:?}", other),
    }

    // Queue advancement skips the unavailable songs and lands on the
    // cached one, announcing each skip on the event bus.
    let mut events = bus.subscribe();
    let queue = vec![remote.clone(), another.clone(), cached.clone()];
    println!("\n⏭️  Advancing through a {}-song queue...", queue.len());
    match resolver.advance_past_unavailable(&queue, 0).await {
        Some((pos, source)) => {
            println!(
                "   Landed on \"{}\" at position {} ({})",
                queue[pos].title,
                pos,
                if source.is_cached() { "cached" } else { "remote" }
            );
        }
        None => println!("   Nothing in the queue is playable"),
    }

    while let Ok(event) = events.try_recv() {
        if let CoreEvent::Playback(PlaybackEvent::SkippedUnavailable { title, .. }) = event {
            println!("   Skipped: \"{}\"", title);
        }
    }

    // Offline library view: only the cached song survives the filter.
    let visible = offline.filtered_songs(&index, &queue);
    println!("\n📚 Offline library view:");
    for song in &visible {
        println!("   - {}", song.title);
    }

    println!("\n🎉 Demo completed successfully!");
    Ok(())
}
