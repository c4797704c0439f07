//! # Offline Mode
//!
//! Effective offline state is reachability from the platform's
//! [`NetworkMonitor`] combined with an explicit user override: forced
//! offline wins over a live connection, and clearing the override returns
//! to reachability-derived state. Readers either poll
//! [`is_offline`](OfflineModeController::is_offline) or subscribe through
//! [`watch`](OfflineModeController::watch); transitions also go out on the
//! event bus as `OfflineEvent::ModeChanged`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

use bridge_traits::network::NetworkMonitor;
use core_cache::CacheIndex;
use core_runtime::events::{CoreEvent, EventBus, OfflineEvent};
use core_store::Song;

use crate::error::Result;

/// Shared between the controller and its watcher task.
struct OfflineState {
    connected: AtomicBool,
    forced: AtomicBool,
    offline_tx: watch::Sender<bool>,
    events: RwLock<Option<Arc<EventBus>>>,
}

impl OfflineState {
    /// Re-derive the effective state and notify only on transitions.
    fn recompute(&self) {
        let forced = self.forced.load(Ordering::SeqCst);
        let offline = forced || !self.connected.load(Ordering::SeqCst);

        let changed = self.offline_tx.send_if_modified(|current| {
            if *current != offline {
                *current = offline;
                true
            } else {
                false
            }
        });

        if changed {
            info!(offline, forced, "Offline mode changed");
            if let Some(bus) = &*self.events.read() {
                bus.emit(CoreEvent::Offline(OfflineEvent::ModeChanged {
                    offline,
                    forced,
                }))
                .ok();
            }
        }
    }
}

/// Tracks whether the player should behave as offline.
///
/// Starts optimistic (online) until [`start`](Self::start) primes it from
/// the monitor. Indeterminate reachability counts as online; hiding
/// remote-only content is worse than an occasional failed fetch.
pub struct OfflineModeController {
    monitor: Arc<dyn NetworkMonitor>,
    state: Arc<OfflineState>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl OfflineModeController {
    pub fn new(monitor: Arc<dyn NetworkMonitor>) -> Self {
        let (offline_tx, _) = watch::channel(false);
        Self {
            monitor,
            state: Arc::new(OfflineState {
                connected: AtomicBool::new(true),
                forced: AtomicBool::new(false),
                offline_tx,
                events: RwLock::new(None),
            }),
            watcher: Mutex::new(None),
        }
    }

    /// Set event bus for mode-change events.
    pub fn with_event_bus(self, event_bus: Arc<EventBus>) -> Self {
        *self.state.events.write() = Some(event_bus);
        self
    }

    /// Prime reachability from the monitor and spawn the change watcher.
    ///
    /// Calling this again replaces the previous watcher.
    ///
    /// # Errors
    ///
    /// Returns an error when the monitor cannot provide a change stream.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<()> {
        let initial = self.monitor.status().await;
        self.state
            .connected
            .store(initial.is_online(), Ordering::SeqCst);
        self.state.recompute();

        let mut stream = self.monitor.subscribe_changes().await?;
        let state = self.state.clone();
        let handle = tokio::spawn(async move {
            while let Some(status) = stream.next().await {
                debug!(status = ?status, "Reachability changed");
                state.connected.store(status.is_online(), Ordering::SeqCst);
                state.recompute();
            }
            debug!("Reachability stream closed");
        });

        if let Some(previous) = self.watcher.lock().replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    /// Stop watching reachability changes. The current state is kept.
    pub fn stop(&self) {
        if let Some(handle) = self.watcher.lock().take() {
            handle.abort();
        }
    }

    /// Whether the player is effectively offline right now.
    pub fn is_offline(&self) -> bool {
        *self.state.offline_tx.borrow()
    }

    /// Whether the current offline state comes from the user override.
    pub fn is_forced(&self) -> bool {
        self.state.forced.load(Ordering::SeqCst)
    }

    /// User override: pretend to be offline regardless of reachability.
    /// `false` returns to reachability-derived state.
    #[instrument(skip(self))]
    pub fn force_offline(&self, enabled: bool) {
        self.state.forced.store(enabled, Ordering::SeqCst);
        self.state.recompute();
    }

    /// Push notification of offline transitions for UI readers.
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.state.offline_tx.subscribe()
    }

    /// Whether remote catalog queries are worth attempting.
    pub fn should_enable_query(&self) -> bool {
        !self.is_offline()
    }

    /// Songs the player can offer right now.
    ///
    /// Online this is the input unchanged, order included. Offline it keeps
    /// only fully cached songs, input order preserved.
    pub fn filtered_songs(&self, index: &CacheIndex, songs: &[Song]) -> Vec<Song> {
        if !self.is_offline() {
            return songs.to_vec();
        }
        songs
            .iter()
            .filter(|song| index.has(&song.id))
            .cloned()
            .collect()
    }
}

impl Drop for OfflineModeController {
    fn drop(&mut self) {
        self.stop();
    }
}
