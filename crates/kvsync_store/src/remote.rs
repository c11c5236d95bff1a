//! Remote store trait definition.

use crate::error::StoreResult;
use crate::subscription::{Callback, WatchToken};
use crate::value::Value;

/// Why the remote store reported an external change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeReason {
    /// Another device (or the service) changed one or more values.
    ServerChange,
    /// The first download after the store became available.
    InitialSync,
    /// The store rejected writes because a quota was exceeded.
    QuotaViolation,
    /// The signed-in account changed.
    AccountChange,
}

/// A batch of remote keys changed outside this process.
///
/// Only key names are delivered; values must be read back from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalChange {
    /// Why the change happened.
    pub reason: ChangeReason,
    /// The keys whose values changed.
    pub keys: Vec<String>,
}

impl ExternalChange {
    /// Creates a server-change notification for `keys`.
    pub fn server_change<S: Into<String>>(keys: impl IntoIterator<Item = S>) -> Self {
        Self {
            reason: ChangeReason::ServerChange,
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }
}

/// A quota-limited, network-backed key-value service.
///
/// The remote store cannot hold a separate companion entry per tracked value,
/// so callers pack whatever metadata they need into the value itself.
/// Enforcement of key-count or size quotas is left to the service.
pub trait RemoteStore: Send + Sync {
    /// Reads the value stored under `key`.
    fn get(&self, key: &str) -> StoreResult<Option<Value>>;

    /// Writes `value` under `key`.
    fn set(&self, key: &str, value: Value) -> StoreResult<()>;

    /// Removes `key`.
    fn remove(&self, key: &str) -> StoreResult<()>;

    /// Best-effort flush of local writes and refresh of remote state.
    ///
    /// Returns false if the store could not be reached.
    fn synchronize(&self) -> bool;

    /// Subscribes to the process-wide "values changed externally" notification.
    fn subscribe(&self, callback: Callback<ExternalChange>) -> StoreResult<WatchToken>;
}
