//! Thread-safe registry of tracked keys.

use crate::key::SyncKey;
use kvsync_store::StoreId;
use parking_lot::Mutex;
use std::collections::HashSet;

#[derive(Default)]
struct RegistryState {
    /// Tracked keys in registration order.
    keys: Vec<SyncKey>,
    /// Keys whose local value is currently being overwritten by a pull.
    applying: HashSet<SyncKey>,
}

/// The set of tracked keys plus the keys currently applying remote state.
///
/// Safe to use from watcher callbacks on arbitrary threads.
#[derive(Default)]
pub struct KeyRegistry {
    state: Mutex<RegistryState>,
}

impl KeyRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks `key`. Returns false if it was already tracked.
    pub fn insert(&self, key: SyncKey) -> bool {
        let mut state = self.state.lock();
        if state.keys.contains(&key) {
            return false;
        }
        state.keys.push(key);
        true
    }

    /// Stops tracking `key`. Returns false if it was not tracked.
    pub fn remove(&self, key: &SyncKey) -> bool {
        let mut state = self.state.lock();
        let before = state.keys.len();
        state.keys.retain(|tracked| tracked != key);
        state.keys.len() != before
    }

    /// Stops tracking every key and returns them.
    pub fn clear(&self) -> Vec<SyncKey> {
        std::mem::take(&mut self.state.lock().keys)
    }

    /// Returns true if `key` is tracked.
    pub fn contains(&self, key: &SyncKey) -> bool {
        self.state.lock().keys.contains(key)
    }

    /// Returns all tracked keys in registration order.
    pub fn keys(&self) -> Vec<SyncKey> {
        self.state.lock().keys.clone()
    }

    /// Finds the tracked key `name` living in the store `store`.
    pub fn find(&self, store: StoreId, name: &str) -> Option<SyncKey> {
        self.state
            .lock()
            .keys
            .iter()
            .find(|key| key.store_id() == store && key.name() == name)
            .cloned()
    }

    /// Returns tracked keys whose name is in `names`.
    pub fn keys_named<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Vec<SyncKey> {
        let names: HashSet<&str> = names.into_iter().collect();
        self.state
            .lock()
            .keys
            .iter()
            .filter(|key| names.contains(key.name()))
            .cloned()
            .collect()
    }

    /// Returns the number of tracked keys.
    pub fn len(&self) -> usize {
        self.state.lock().keys.len()
    }

    /// Returns true if no key is tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Marks `key` as applying remote state until the guard is dropped.
    pub fn begin_applying(&self, key: &SyncKey) -> ApplyingGuard<'_> {
        self.state.lock().applying.insert(key.clone());
        ApplyingGuard {
            registry: self,
            key: key.clone(),
        }
    }

    /// Returns true if `key` is being overwritten by a pull right now.
    pub fn is_applying(&self, key: &SyncKey) -> bool {
        self.state.lock().applying.contains(key)
    }
}

/// Clears the "applying remote state" mark on drop.
pub struct ApplyingGuard<'a> {
    registry: &'a KeyRegistry,
    key: SyncKey,
}

impl Drop for ApplyingGuard<'_> {
    fn drop(&mut self) {
        self.registry.state.lock().applying.remove(&self.key);
    }
}
