//! Local store trait definition.

use crate::error::StoreResult;
use crate::subscription::{Callback, WatchToken};
use crate::value::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identity of a local store instance.
///
/// Two handles compare equal only if they address the same underlying store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreId(u64);

impl StoreId {
    /// Allocates a process-unique identity.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw identifier.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "store#{}", self.0)
    }
}

/// Options for [`LocalStore::watch`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchOptions {
    /// Deliver one event with the current value immediately on subscription.
    pub deliver_initial_value: bool,
    /// Populate [`ChangeEvent::old_value`] with the value before the change.
    pub deliver_before_and_after: bool,
}

impl WatchOptions {
    /// Options carrying both the old and the new value.
    pub fn before_and_after() -> Self {
        Self {
            deliver_initial_value: false,
            deliver_before_and_after: true,
        }
    }

    /// Also deliver the current value on subscription.
    pub fn with_initial_value(mut self) -> Self {
        self.deliver_initial_value = true;
        self
    }
}

/// A value change observed on a local store key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// The key that changed.
    pub key: String,
    /// The previous value, when requested via
    /// [`WatchOptions::deliver_before_and_after`].
    pub old_value: Option<Value>,
    /// The value after the change. `None` means the key was removed.
    pub new_value: Option<Value>,
    /// True for the synthetic event delivered on subscription.
    pub initial: bool,
}

impl ChangeEvent {
    /// Returns true if the event carries both sides and they are equal.
    pub fn is_unchanged(&self, options: WatchOptions) -> bool {
        options.deliver_before_and_after && !self.initial && self.old_value == self.new_value
    }
}

/// The always-available store on the running device.
///
/// # Invariants
///
/// - Change callbacks for a key are delivered synchronously, on the thread
///   performing the write, before `set`/`remove` returns
/// - Callbacks are invoked without internal locks held, so they may call
///   back into the store
/// - Implementations must be `Send + Sync`
pub trait LocalStore: Send + Sync {
    /// Returns the identity of this store.
    fn id(&self) -> StoreId;

    /// Reads the value stored under `key`.
    fn get(&self, key: &str) -> StoreResult<Option<Value>>;

    /// Writes `value` under `key`, notifying watchers of `key`.
    fn set(&self, key: &str, value: Value) -> StoreResult<()>;

    /// Removes `key`, notifying watchers of `key`.
    fn remove(&self, key: &str) -> StoreResult<()>;

    /// Subscribes to changes of a single key.
    fn watch(
        &self,
        key: &str,
        options: WatchOptions,
        callback: Callback<ChangeEvent>,
    ) -> StoreResult<WatchToken>;
}
