//! In-memory simulation of a shared remote store.

use crate::error::{StoreError, StoreResult};
use crate::remote::{ExternalChange, RemoteStore};
use crate::subscription::{Callback, SubscriberSet, WatchToken};
use crate::value::Value;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

struct Shared {
    values: RwLock<BTreeMap<String, Value>>,
    devices: Mutex<Vec<Weak<Device>>>,
}

impl Shared {
    fn live_devices(&self) -> Vec<Arc<Device>> {
        let mut devices = self.devices.lock();
        devices.retain(|device| device.strong_count() > 0);
        devices.iter().filter_map(Weak::upgrade).collect()
    }
}

struct Device {
    pending: Mutex<BTreeSet<String>>,
    subscribers: SubscriberSet<ExternalChange>,
    writes: Mutex<HashMap<String, u64>>,
    synchronize_calls: AtomicU64,
    connected: AtomicBool,
    echo_own_writes: AtomicBool,
}

impl Device {
    fn new() -> Self {
        Self {
            pending: Mutex::new(BTreeSet::new()),
            subscribers: SubscriberSet::new(),
            writes: Mutex::new(HashMap::new()),
            synchronize_calls: AtomicU64::new(0),
            connected: AtomicBool::new(true),
            echo_own_writes: AtomicBool::new(false),
        }
    }
}

/// An in-memory stand-in for a cloud key-value service.
///
/// Each handle models one device. Handles obtained through
/// [`InMemoryRemoteStore::connect_device`] share the same data. Writes are
/// visible to every device immediately, but the "changed externally"
/// notification for them is only delivered to the *other* devices when the
/// writer calls [`RemoteStore::synchronize`].
///
/// # Example
///
/// ```rust
/// use kvsync_store::{InMemoryRemoteStore, RemoteStore, Value};
///
/// let phone = InMemoryRemoteStore::new();
/// let laptop = phone.connect_device();
///
/// phone.set("theme", Value::from("dark")).unwrap();
/// assert!(phone.synchronize());
/// assert_eq!(laptop.get("theme").unwrap(), Some(Value::from("dark")));
/// ```
pub struct InMemoryRemoteStore {
    shared: Arc<Shared>,
    device: Arc<Device>,
}

impl InMemoryRemoteStore {
    /// Creates an empty store with a single device attached.
    #[must_use]
    pub fn new() -> Self {
        let shared = Arc::new(Shared {
            values: RwLock::new(BTreeMap::new()),
            devices: Mutex::new(Vec::new()),
        });
        Self::attach(shared)
    }

    fn attach(shared: Arc<Shared>) -> Self {
        let device = Arc::new(Device::new());
        shared.devices.lock().push(Arc::downgrade(&device));
        Self { shared, device }
    }

    /// Returns a handle for another device sharing the same data.
    #[must_use]
    pub fn connect_device(&self) -> Self {
        Self::attach(Arc::clone(&self.shared))
    }

    /// When enabled, `synchronize` also notifies this device of its own writes.
    ///
    /// Real services occasionally echo a device's own changes back to it;
    /// this makes that reproducible.
    #[must_use]
    pub fn with_echo(self, echo: bool) -> Self {
        self.device.echo_own_writes.store(echo, Ordering::SeqCst);
        self
    }

    /// Simulates losing or regaining connectivity on this device.
    pub fn set_connected(&self, connected: bool) {
        self.device.connected.store(connected, Ordering::SeqCst);
    }

    /// Writes (or removes) a value as the service itself would, and notifies
    /// every device immediately.
    pub fn inject(&self, key: &str, value: Option<Value>) {
        {
            let mut values = self.shared.values.write();
            match value {
                Some(value) => values.insert(key.to_string(), value),
                None => values.remove(key),
            };
        }
        self.broadcast(&ExternalChange::server_change([key]));
    }

    /// Delivers `change` to every device.
    pub fn broadcast(&self, change: &ExternalChange) {
        for device in self.shared.live_devices() {
            device.subscribers.notify_all(change);
        }
    }

    /// Returns a copy of all entries.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.shared.values.read().clone()
    }

    /// Returns how many writes (sets and removes) this device made to `key`.
    #[must_use]
    pub fn writes_for(&self, key: &str) -> u64 {
        self.device.writes.lock().get(key).copied().unwrap_or(0)
    }

    /// Returns how many times this device called `synchronize`.
    #[must_use]
    pub fn synchronize_count(&self) -> u64 {
        self.device.synchronize_calls.load(Ordering::SeqCst)
    }

    /// Returns the number of subscribers on this device.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.device.subscribers.len()
    }

    fn ensure_connected(&self) -> StoreResult<()> {
        if self.device.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::unavailable("remote store is disconnected"))
        }
    }

    fn record_write(&self, key: &str) {
        *self.device.writes.lock().entry(key.to_string()).or_insert(0) += 1;
        self.device.pending.lock().insert(key.to_string());
    }
}

impl Default for InMemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteStore for InMemoryRemoteStore {
    fn get(&self, key: &str) -> StoreResult<Option<Value>> {
        self.ensure_connected()?;
        Ok(self.shared.values.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> StoreResult<()> {
        self.ensure_connected()?;
        self.shared.values.write().insert(key.to_string(), value);
        self.record_write(key);
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        self.ensure_connected()?;
        self.shared.values.write().remove(key);
        self.record_write(key);
        Ok(())
    }

    fn synchronize(&self) -> bool {
        self.device.synchronize_calls.fetch_add(1, Ordering::SeqCst);
        if self.ensure_connected().is_err() {
            return false;
        }

        let keys: Vec<String> = std::mem::take(&mut *self.device.pending.lock())
            .into_iter()
            .collect();
        if keys.is_empty() {
            return true;
        }

        let change = ExternalChange::server_change(keys);
        let echo = self.device.echo_own_writes.load(Ordering::SeqCst);
        for device in self.shared.live_devices() {
            if echo || !Arc::ptr_eq(&device, &self.device) {
                device.subscribers.notify_all(&change);
            }
        }
        true
    }

    fn subscribe(&self, callback: Callback<ExternalChange>) -> StoreResult<WatchToken> {
        Ok(self.device.subscribers.subscribe(None, callback))
    }
}
