//! Error types for the sync engine.

use kvsync_store::StoreError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
///
/// None of these escape the engine's public sync operations; they are logged,
/// counted in [`crate::SyncStats`], and the affected sync becomes a no-op
/// until the next trigger.
#[derive(Error, Debug)]
pub enum SyncError {
    /// A local or remote store call failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A remote entry is not a `[timestamp, value]` pair.
    #[error("malformed remote entry for '{key}': {reason}")]
    MalformedRemoteEntry {
        /// Remote key.
        key: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A key name cannot be used with the remote store.
    #[error("invalid key name '{name}': {reason}")]
    InvalidKeyName {
        /// The offending name.
        name: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// The engine was created outside a tokio runtime.
    #[error("no tokio runtime available to drive the task queue")]
    NoRuntime,
}

impl SyncError {
    /// Creates a malformed remote entry error.
    pub fn malformed(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedRemoteEntry {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if the failure was a store that could not be reached.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, SyncError::Store(err) if err.is_unavailable())
    }
}
