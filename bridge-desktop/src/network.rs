//! Network Monitoring Implementation

use async_trait::async_trait;
use bridge_traits::{
    error::Result,
    network::{NetworkChangeStream, NetworkMonitor, NetworkStatus},
};
use std::time::Duration;
use tracing::debug;

/// Desktop network monitor implementation
///
/// Detects reachability with a TCP probe to a public resolver.
///
/// Note: Platform-specific implementations (Linux netlink, macOS
/// SystemConfiguration, Windows WinAPI) would be more precise but require
/// additional dependencies.
#[derive(Clone)]
pub struct DesktopNetworkMonitor {
    probe_addr: String,
    poll_interval: Duration,
}

impl DesktopNetworkMonitor {
    /// Create a new network monitor probing a well-known public resolver
    pub fn new() -> Self {
        Self {
            probe_addr: "8.8.8.8:53".to_string(),
            poll_interval: Duration::from_secs(5),
        }
    }

    /// Probe a custom address instead of the default resolver
    pub fn with_probe_addr(mut self, addr: impl Into<String>) -> Self {
        self.probe_addr = addr.into();
        self
    }

    /// Override the change-stream polling interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Check network connectivity by opening a TCP connection to the
    /// probe address
    async fn check_connectivity(&self) -> NetworkStatus {
        match tokio::time::timeout(
            Duration::from_secs(5),
            tokio::net::TcpStream::connect(&self.probe_addr),
        )
        .await
        {
            Ok(Ok(_)) => NetworkStatus::Connected,
            Ok(Err(_)) => NetworkStatus::Disconnected,
            Err(_) => NetworkStatus::Disconnected,
        }
    }
}

impl Default for DesktopNetworkMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NetworkMonitor for DesktopNetworkMonitor {
    async fn status(&self) -> NetworkStatus {
        let status = self.check_connectivity().await;
        debug!(status = ?status, "Network status probed");
        status
    }

    async fn subscribe_changes(&self) -> Result<Box<dyn NetworkChangeStream>> {
        // Polling fallback; platform change notifications would replace this.
        Ok(Box::new(DesktopNetworkChangeStream {
            monitor: self.clone(),
            last_status: None,
        }))
    }
}

/// Network change stream that polls for changes
struct DesktopNetworkChangeStream {
    monitor: DesktopNetworkMonitor,
    last_status: Option<NetworkStatus>,
}

#[async_trait]
impl NetworkChangeStream for DesktopNetworkChangeStream {
    async fn next(&mut self) -> Option<NetworkStatus> {
        // Emit only on transitions, never on every poll.
        loop {
            tokio::time::sleep(self.monitor.poll_interval).await;

            let status = self.monitor.check_connectivity().await;
            if self.last_status != Some(status) {
                self.last_status = Some(status);
                return Some(status);
            }
        }
    }
}
