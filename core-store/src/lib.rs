//! # Offline Media Store
//!
//! Domain models and durable storage for the offline cache.
//!
//! ## Overview
//!
//! This crate defines what gets persisted (song records, audio blobs, image
//! blobs) and the [`PersistentStore`] trait everything above it depends on.
//! Two backends ship here:
//!
//! - [`MemoryStore`] - in-memory reference implementation, used directly in
//!   tests and injectable anywhere a throwaway cache is acceptable
//! - [`FsStore`] - filesystem-backed implementation for native hosts, with
//!   atomic stage-then-rename blob commits
//!
//! The store is always injected; nothing in this workspace holds a global
//! store instance.
//!
//! ## Records vs. blobs
//!
//! A song's durable record ([`CacheEntry`]) carries the metadata snapshot
//! and a tagged [`AudioState`]; the audio payload lives in a separate blob
//! collection. Callers commit the blob first and upgrade the record second,
//! so a record never claims audio that is not durably present.

pub mod catalog;
pub mod error;
pub mod fs;
pub mod memory;
pub mod models;
pub mod store;

pub use catalog::RemoteCatalog;
pub use error::{Result, StoreError};
pub use fs::FsStore;
pub use memory::MemoryStore;
pub use models::{
    AlbumRef, AudioState, CacheEntry, DownloadVariant, ImageVariant, Quality, Song, SongId,
};
pub use store::PersistentStore;
