//! Network Monitoring Abstraction
//!
//! Provides network reachability information and change notifications.

use crate::error::Result;

/// Network connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkStatus {
    /// Connected to network
    Connected,
    /// Not connected to any network
    Disconnected,
    /// Connection status unknown or indeterminate
    Indeterminate,
}

impl NetworkStatus {
    /// Whether the host should be treated as online.
    ///
    /// `Indeterminate` counts as online: a false "offline" would hide
    /// remote-only content, which is worse than an occasional failed fetch.
    pub fn is_online(&self) -> bool {
        !matches!(self, NetworkStatus::Disconnected)
    }
}

/// Network monitor trait
///
/// Provides reachability information so the cache layer can:
/// - Fall back to cached media when offline
/// - Skip remote metadata queries that would only fail
/// - Flip back to remote playback when connectivity returns
///
/// # Example
///
/// ```ignore
/// use bridge_traits::network::NetworkMonitor;
///
/// async fn can_fetch(monitor: &dyn NetworkMonitor) -> bool {
///     monitor.is_connected().await
/// }
/// ```
#[async_trait::async_trait]
pub trait NetworkMonitor: Send + Sync {
    /// Get current reachability status
    async fn status(&self) -> NetworkStatus;

    /// Check if currently connected to any network
    async fn is_connected(&self) -> bool {
        self.status().await.is_online()
    }

    /// Subscribe to reachability changes
    ///
    /// Returns a stream of status updates. Implementations should emit
    /// only on transitions, not on every poll.
    async fn subscribe_changes(&self) -> Result<Box<dyn NetworkChangeStream>>;
}

/// Stream of reachability changes
#[async_trait::async_trait]
pub trait NetworkChangeStream: Send {
    /// Get the next status update
    ///
    /// Returns `None` when the stream is closed.
    async fn next(&mut self) -> Option<NetworkStatus>;
}
