//! In-memory local store.

use crate::error::StoreResult;
use crate::local::{ChangeEvent, LocalStore, StoreId, WatchOptions};
use crate::subscription::{Callback, SubscriberSet, WatchToken};
use crate::value::Value;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// A key/value map that fans out change events to per-key watchers.
///
/// Shared by the in-memory and file-backed local stores.
pub(crate) struct WatchableMap {
    values: RwLock<BTreeMap<String, Value>>,
    writes: Mutex<HashMap<String, u64>>,
    subscribers: SubscriberSet<ChangeEvent>,
}

impl WatchableMap {
    pub(crate) fn new(values: BTreeMap<String, Value>) -> Self {
        Self {
            values: RwLock::new(values),
            writes: Mutex::new(HashMap::new()),
            subscribers: SubscriberSet::new(),
        }
    }

    pub(crate) fn get(&self, key: &str) -> Option<Value> {
        self.values.read().get(key).cloned()
    }

    pub(crate) fn snapshot(&self) -> BTreeMap<String, Value> {
        self.values.read().clone()
    }

    /// Applies a write, runs `persist` against the new contents, then notifies.
    ///
    /// If `persist` fails the previous value is restored and nobody is notified.
    pub(crate) fn write(
        &self,
        key: &str,
        new_value: Option<Value>,
        persist: impl FnOnce(&BTreeMap<String, Value>) -> StoreResult<()>,
    ) -> StoreResult<()> {
        let old_value = {
            let mut values = self.values.write();
            let old_value = match &new_value {
                Some(value) => values.insert(key.to_string(), value.clone()),
                None => values.remove(key),
            };

            if let Err(err) = persist(&*values) {
                match &old_value {
                    Some(value) => values.insert(key.to_string(), value.clone()),
                    None => values.remove(key),
                };
                return Err(err);
            }
            old_value
        };

        *self.writes.lock().entry(key.to_string()).or_insert(0) += 1;

        let event = ChangeEvent {
            key: key.to_string(),
            old_value,
            new_value,
            initial: false,
        };
        self.subscribers.notify(key, &event);
        Ok(())
    }

    pub(crate) fn watch(
        &self,
        key: &str,
        options: WatchOptions,
        callback: Callback<ChangeEvent>,
    ) -> WatchToken {
        let deliver = Arc::clone(&callback);
        let wrapped: Callback<ChangeEvent> = if options.deliver_before_and_after {
            deliver
        } else {
            Arc::new(move |event: &ChangeEvent| {
                let stripped = ChangeEvent {
                    old_value: None,
                    ..event.clone()
                };
                deliver(&stripped);
            })
        };

        let token = self.subscribers.subscribe(Some(key.to_string()), wrapped);

        if options.deliver_initial_value {
            callback(&ChangeEvent {
                key: key.to_string(),
                old_value: None,
                new_value: self.get(key),
                initial: true,
            });
        }

        token
    }

    pub(crate) fn writes_for(&self, key: &str) -> u64 {
        self.writes.lock().get(key).copied().unwrap_or(0)
    }

    pub(crate) fn watcher_count(&self) -> usize {
        self.subscribers.len()
    }
}

/// An in-memory local store.
///
/// Suitable for tests and for processes that do not need persistence.
/// Every `set`/`remove` is counted per key, which lets tests assert exactly
/// how many writes a sync produced.
///
/// # Example
///
/// ```rust
/// use kvsync_store::{InMemoryLocalStore, LocalStore, Value};
///
/// let store = InMemoryLocalStore::new();
/// store.set("theme", Value::from("dark")).unwrap();
/// assert_eq!(store.get("theme").unwrap(), Some(Value::from("dark")));
/// ```
pub struct InMemoryLocalStore {
    id: StoreId,
    map: WatchableMap,
}

impl InMemoryLocalStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::with_values(BTreeMap::new())
    }

    /// Creates a store pre-populated with `values`.
    #[must_use]
    pub fn with_values(values: BTreeMap<String, Value>) -> Self {
        Self {
            id: StoreId::next(),
            map: WatchableMap::new(values),
        }
    }

    /// Returns a copy of all entries.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.map.snapshot()
    }

    /// Returns how many writes (sets and removes) `key` has received.
    #[must_use]
    pub fn writes_for(&self, key: &str) -> u64 {
        self.map.writes_for(key)
    }

    /// Returns the number of active watchers across all keys.
    #[must_use]
    pub fn watcher_count(&self) -> usize {
        self.map.watcher_count()
    }
}

impl Default for InMemoryLocalStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalStore for InMemoryLocalStore {
    fn id(&self) -> StoreId {
        self.id
    }

    fn get(&self, key: &str) -> StoreResult<Option<Value>> {
        Ok(self.map.get(key))
    }

    fn set(&self, key: &str, value: Value) -> StoreResult<()> {
        self.map.write(key, Some(value), |_| Ok(()))
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        self.map.write(key, None, |_| Ok(()))
    }

    fn watch(
        &self,
        key: &str,
        options: WatchOptions,
        callback: Callback<ChangeEvent>,
    ) -> StoreResult<WatchToken> {
        Ok(self.map.watch(key, options, callback))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<ChangeEvent>>>, Callback<ChangeEvent>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let callback: Callback<ChangeEvent> = Arc::new(move |event: &ChangeEvent| {
            sink.lock().push(event.clone());
        });
        (events, callback)
    }

    #[test]
    fn set_get_remove() {
        let store = InMemoryLocalStore::new();
        assert_eq!(store.get("a").unwrap(), None);

        store.set("a", Value::Integer(1)).unwrap();
        assert_eq!(store.get("a").unwrap(), Some(Value::Integer(1)));

        store.remove("a").unwrap();
        assert_eq!(store.get("a").unwrap(), None);
        assert_eq!(store.writes_for("a"), 2);
    }

    #[test]
    fn watch_delivers_before_and_after() {
        let store = InMemoryLocalStore::new();
        store.set("a", Value::from("old")).unwrap();

        let (events, callback) = recorder();
        let _token = store
            .watch("a", WatchOptions::before_and_after(), callback)
            .unwrap();

        store.set("a", Value::from("new")).unwrap();
        store.set("b", Value::from("other")).unwrap();

        let events = events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].old_value, Some(Value::from("old")));
        assert_eq!(events[0].new_value, Some(Value::from("new")));
        assert!(!events[0].initial);
    }

    #[test]
    fn watch_without_before_strips_old_value() {
        let store = InMemoryLocalStore::new();
        store.set("a", Value::from("old")).unwrap();

        let (events, callback) = recorder();
        let _token = store.watch("a", WatchOptions::default(), callback).unwrap();
        store.remove("a").unwrap();

        let events = events.lock();
        assert_eq!(events[0].old_value, None);
        assert_eq!(events[0].new_value, None);
    }

    #[test]
    fn watch_delivers_initial_value() {
        let store = InMemoryLocalStore::new();
        store.set("a", Value::Bool(true)).unwrap();

        let (events, callback) = recorder();
        let _token = store
            .watch(
                "a",
                WatchOptions::before_and_after().with_initial_value(),
                callback,
            )
            .unwrap();

        let events = events.lock();
        assert_eq!(events.len(), 1);
        assert!(events[0].initial);
        assert_eq!(events[0].new_value, Some(Value::Bool(true)));
    }

    #[test]
    fn dropped_token_stops_delivery() {
        let store = InMemoryLocalStore::new();
        let (events, callback) = recorder();
        let token = store
            .watch("a", WatchOptions::before_and_after(), callback)
            .unwrap();
        assert_eq!(store.watcher_count(), 1);

        drop(token);
        store.set("a", Value::Null).unwrap();

        assert!(events.lock().is_empty());
        assert_eq!(store.watcher_count(), 0);
    }

    #[test]
    fn callback_can_write_back_into_store() {
        let store = Arc::new(InMemoryLocalStore::new());
        let weak = Arc::downgrade(&store);
        let _token = store
            .watch(
                "a",
                WatchOptions::default(),
                Arc::new(move |_: &ChangeEvent| {
                    if let Some(store) = weak.upgrade() {
                        store.set("a_seen", Value::Bool(true)).unwrap();
                    }
                }),
            )
            .unwrap();

        store.set("a", Value::Integer(3)).unwrap();
        assert_eq!(store.get("a_seen").unwrap(), Some(Value::Bool(true)));
    }

    #[test]
    fn stores_have_distinct_ids() {
        let first = InMemoryLocalStore::new();
        let second = InMemoryLocalStore::new();
        assert_ne!(first.id(), second.id());
    }

    mod model {
        use super::*;
        use proptest::prelude::*;

        fn op_strategy() -> impl Strategy<Value = (String, Option<i64>)> {
            (
                prop::sample::select(vec!["a", "b", "c"]).prop_map(String::from),
                prop::option::of(any::<i64>()),
            )
        }

        proptest! {
            #[test]
            fn matches_btreemap_model(ops in prop::collection::vec(op_strategy(), 0..64)) {
                let store = InMemoryLocalStore::new();
                let mut model = BTreeMap::new();

                for (key, value) in &ops {
                    match value {
                        Some(n) => {
                            store.set(key, Value::Integer(*n)).unwrap();
                            model.insert(key.clone(), Value::Integer(*n));
                        }
                        None => {
                            store.remove(key).unwrap();
                            model.remove(key);
                        }
                    }
                }

                prop_assert_eq!(store.snapshot(), model);
                let total: u64 = ["a", "b", "c"].iter().map(|k| store.writes_for(k)).sum();
                prop_assert_eq!(total, ops.len() as u64);
            }
        }
    }
}
