//! # Download Task Tracking
//!
//! Ephemeral per-song download state. Tasks live in memory only and never
//! persist across restarts; the durable record of what happened is the
//! store itself.
//!
//! ## State Machine
//!
//! ```text
//! Pending → Downloading → Completed
//!               ↓
//!             Failed  (→ fresh Pending task on a later retry)
//! ```
//!
//! The registry doubles as the per-song download lock: claiming a song that
//! already has an active task fails, which is how "at most one in-flight
//! download per song" is enforced.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use core_store::SongId;

// ============================================================================
// Status
// ============================================================================

/// The current status of a download task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    /// Task registered, transfer not started
    Pending,
    /// Bytes are moving
    Downloading,
    /// Audio committed durably
    Completed,
    /// All attempts spent, or cancelled by removal
    Failed,
}

impl DownloadStatus {
    /// Check if this status represents a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, DownloadStatus::Completed | DownloadStatus::Failed)
    }

    /// Check if this status represents an active state
    pub fn is_active(&self) -> bool {
        matches!(self, DownloadStatus::Pending | DownloadStatus::Downloading)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadStatus::Pending => "pending",
            DownloadStatus::Downloading => "downloading",
            DownloadStatus::Completed => "completed",
            DownloadStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Task Snapshot
// ============================================================================

/// Progress snapshot for one song's download.
///
/// `bytes_total` is `None` when the server omitted a content length; in that
/// state [`percent`](Self::percent) is `None` and consumers render an
/// indeterminate indicator instead of dividing by zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadTask {
    /// Song being downloaded
    pub song_id: SongId,
    /// Current status
    pub status: DownloadStatus,
    /// Attempts started so far (1-based once the transfer begins)
    pub attempts: u32,
    /// Bytes received in the current attempt
    pub bytes_downloaded: u64,
    /// Expected total, when the server said
    pub bytes_total: Option<u64>,
    /// Error message once failed
    pub error: Option<String>,
}

impl DownloadTask {
    fn new(song_id: SongId) -> Self {
        Self {
            song_id,
            status: DownloadStatus::Pending,
            attempts: 0,
            bytes_downloaded: 0,
            bytes_total: None,
            error: None,
        }
    }

    /// Progress percentage, `None` while the total is unknown.
    pub fn percent(&self) -> Option<u8> {
        match self.bytes_total {
            Some(total) if total > 0 => {
                let pct = (self.bytes_downloaded as f64 / total as f64) * 100.0;
                Some(pct.min(100.0) as u8)
            }
            _ => None,
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

struct TaskSlot {
    task: DownloadTask,
    /// Present while the download is in flight
    cancel: Option<CancellationToken>,
}

/// In-memory task table, keyed by song id.
///
/// One slot per song: an active slot blocks new claims for the same song,
/// a terminal slot stays visible until dismissed or replaced by a retry.
pub(crate) struct TaskRegistry {
    slots: Mutex<HashMap<SongId, TaskSlot>>,
}

impl TaskRegistry {
    pub(crate) fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Claim the per-song download lock.
    ///
    /// Returns the cancellation token for the new task, or `None` when a
    /// download for this song is already in flight. A terminal slot from an
    /// earlier attempt is replaced.
    pub(crate) async fn begin(&self, id: &SongId) -> Option<CancellationToken> {
        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.get(id) {
            if slot.task.status.is_active() {
                return None;
            }
        }

        let token = CancellationToken::new();
        slots.insert(
            id.clone(),
            TaskSlot {
                task: DownloadTask::new(id.clone()),
                cancel: Some(token.clone()),
            },
        );
        Some(token)
    }

    /// Transition to `Downloading` and record the expected total.
    pub(crate) async fn set_downloading(&self, id: &SongId, bytes_total: Option<u64>) {
        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.get_mut(id) {
            slot.task.status = DownloadStatus::Downloading;
            slot.task.bytes_total = bytes_total;
        }
    }

    /// Record the start of attempt `attempt` (1-based), resetting the byte
    /// counter for the fresh stream.
    pub(crate) async fn record_attempt(&self, id: &SongId, attempt: u32) {
        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.get_mut(id) {
            slot.task.attempts = attempt;
            slot.task.bytes_downloaded = 0;
        }
    }

    /// Update the received byte counter for the current attempt.
    pub(crate) async fn record_progress(&self, id: &SongId, bytes_downloaded: u64) {
        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.get_mut(id) {
            slot.task.bytes_downloaded = bytes_downloaded;
        }
    }

    /// Terminal success; releases the per-song lock.
    pub(crate) async fn mark_completed(&self, id: &SongId) {
        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.get_mut(id) {
            slot.task.status = DownloadStatus::Completed;
            slot.task.error = None;
            slot.cancel = None;
        }
    }

    /// Terminal failure; releases the per-song lock. The slot stays visible
    /// until dismissed or retried.
    pub(crate) async fn mark_failed(&self, id: &SongId, message: impl Into<String>) {
        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.get_mut(id) {
            slot.task.status = DownloadStatus::Failed;
            slot.task.error = Some(message.into());
            slot.cancel = None;
        }
    }

    /// Fire the cancellation token of an in-flight task. Returns whether
    /// there was one.
    pub(crate) async fn cancel(&self, id: &SongId) -> bool {
        let slots = self.slots.lock().await;
        match slots.get(id) {
            Some(slot) if slot.task.status.is_active() => {
                if let Some(token) = &slot.cancel {
                    token.cancel();
                    true
                } else {
                    false
                }
            }
            _ => false,
        }
    }

    /// Snapshot of one task, terminal or not.
    pub(crate) async fn task(&self, id: &SongId) -> Option<DownloadTask> {
        self.slots.lock().await.get(id).map(|s| s.task.clone())
    }

    /// Snapshot of every in-flight task.
    pub(crate) async fn active_tasks(&self) -> Vec<DownloadTask> {
        self.slots
            .lock()
            .await
            .values()
            .filter(|s| s.task.status.is_active())
            .map(|s| s.task.clone())
            .collect()
    }

    /// Drop a terminal task from the table. Active tasks cannot be
    /// dismissed; returns whether anything was removed.
    pub(crate) async fn dismiss(&self, id: &SongId) -> bool {
        let mut slots = self.slots.lock().await;
        match slots.get(id) {
            Some(slot) if slot.task.status.is_terminal() => {
                slots.remove(id);
                true
            }
            _ => false,
        }
    }
}
