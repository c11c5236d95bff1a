//! Sync status and statistics.

use std::fmt;
use std::time::Instant;

/// Progress of the most recent sync.
///
/// Observability only; it never drives control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncStatus {
    /// No sync is running. Also reported when a queued task is picked up,
    /// before it starts syncing.
    #[default]
    Idle,
    /// A sync task is running.
    Syncing,
    /// The last sync task finished.
    Completed,
}

impl SyncStatus {
    /// Returns true if a sync is running.
    pub fn is_active(&self) -> bool {
        matches!(self, SyncStatus::Syncing)
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::Idle => f.write_str("idle"),
            SyncStatus::Syncing => f.write_str("syncing"),
            SyncStatus::Completed => f.write_str("completed"),
        }
    }
}

/// Statistics about sync operations.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Values written to the remote store.
    pub pushes: u64,
    /// Values written to the local store from the remote store.
    pub pulls: u64,
    /// Remote entries removed because the local value was absent.
    pub remote_deletions: u64,
    /// Pulls skipped because the remote entry was absent, malformed, or not newer.
    pub skipped_pulls: u64,
    /// Remote entries that were not valid `[timestamp, value]` pairs.
    pub malformed_entries: u64,
    /// Local change events ignored because a pull caused them.
    pub suppressed_local_changes: u64,
    /// Remote notifications ignored because our own write caused them.
    pub suppressed_echoes: u64,
    /// Sync steps that failed on a store error.
    pub failures: u64,
    /// When the last sync task finished.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}
