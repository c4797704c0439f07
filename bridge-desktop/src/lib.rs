//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! This crate provides production-ready implementations of the bridge
//! traits using desktop-appropriate libraries:
//! - `HttpClient` using `reqwest`
//! - `NetworkMonitor` using TCP reachability probes
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{DesktopNetworkMonitor, ReqwestHttpClient};
//!
//! #[tokio::main]
//! async fn main() {
//!     let http_client = ReqwestHttpClient::new();
//!     let monitor = DesktopNetworkMonitor::new();
//!
//!     // Hand both to the cache configuration
//! }
//! ```

mod http;
mod network;

pub use http::ReqwestHttpClient;
pub use network::DesktopNetworkMonitor;
