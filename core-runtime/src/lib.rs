//! # Core Runtime
//!
//! Shared runtime infrastructure for the offline media cache:
//!
//! - **Events**: broadcast event bus connecting the download pipeline,
//!   eviction, and playback to UI subscribers
//! - **Logging**: structured tracing with pretty/JSON/compact formats
//!
//! ## Architecture
//!
//! The runtime deliberately owns no domain logic. Domain crates emit
//! [`events::CoreEvent`]s through an [`events::EventBus`] handed to them at
//! construction time, and consumers subscribe through [`events::EventStream`]
//! without knowing who produced what.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::events::EventBus;
//! use core_runtime::logging::{init_logging, LoggingConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     init_logging(LoggingConfig::default()).expect("logging init");
//!
//!     let bus = EventBus::new(100);
//!     let mut stream = bus.subscribe();
//!
//!     tokio::spawn(async move {
//!         while let Some(event) = stream.recv().await {
//!             tracing::info!(event = ?event, "core event");
//!         }
//!     });
//! }
//! ```

pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
pub use events::{CoreEvent, EventBus, EventStream};
