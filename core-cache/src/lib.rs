//! # Offline Cache Module
//!
//! Download pipeline, in-memory index, and eviction for the offline song
//! cache.
//!
//! ## Overview
//!
//! This module owns everything between "the user tapped download" and "the
//! blob is durably cached":
//! - Streaming downloads with bounded retry and per-song coalescing
//! - A rebuild-at-startup index that mirrors the durable store and never
//!   over-reports availability
//! - Oldest-first eviction under a configurable size ceiling, with the
//!   actively playing song protected
//! - Storage budget introspection for settings surfaces
//!
//! ## Components
//!
//! - **Download Pipeline** (`pipeline`): Orchestrates fetch, hash, commit, and artwork
//! - **Cache Index** (`index`): In-memory availability mirror rebuilt from the store
//! - **Evictor** (`eviction`): Size-ceiling enforcement, oldest `cached_at` first
//! - **Task Registry** (`tasks`): Per-song download state with cancellation
//! - **Storage Budget** (`budget`): Usage snapshots against the platform quota

pub mod budget;
pub mod config;
pub mod error;
pub mod eviction;
pub mod index;
pub mod pipeline;
pub mod tasks;

pub use budget::{format_bytes, StorageBudget};
pub use config::CacheConfig;
pub use error::{CacheError, Result};
pub use eviction::{EvictionReport, Evictor};
pub use index::CacheIndex;
pub use pipeline::{DownloadOutcome, DownloadPipeline};
pub use tasks::{DownloadStatus, DownloadTask};
