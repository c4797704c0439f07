//! # Playback Source Layer
//!
//! Connects the playback engine to the offline cache.
//!
//! ## Overview
//!
//! This crate handles:
//! - Resolving songs to playable sources: cached blob, remote URL, or
//!   unavailable, in that order
//! - Leasing cached audio through scoped [`BlobHandle`]s
//! - Skipping unavailable songs while advancing through a queue
//! - Offline mode, derived from reachability with a user override
//!
//! ## Components
//!
//! - [`SourceResolver`]: per-song source resolution with memoization
//! - [`OfflineModeController`]: reachability-backed offline state
//! - [`PlaybackError`]: error types for the source layer

pub mod error;
pub mod offline;
pub mod resolver;

pub use error::{PlaybackError, Result};
pub use offline::OfflineModeController;
pub use resolver::{BlobHandle, ResolvedSource, SourceResolver};
