//! Test fixtures: simulated devices sharing one remote store.
//!
//! Constructors create a [`SyncEngine`] and must be called inside a tokio
//! runtime.

use kvsync_engine::{ManualClock, RemoteBundle, SyncConfig, SyncEngine, SyncKey, Timestamp};
use kvsync_store::{
    FileLocalStore, InMemoryLocalStore, InMemoryRemoteStore, LocalStore, RemoteStore, Value,
};
use std::future::Future;
use std::sync::Arc;
use tempfile::TempDir;

/// One device: a local store, its engine, and its handle on the shared remote.
pub struct TestDevice<L = InMemoryLocalStore> {
    /// The sync engine.
    pub engine: SyncEngine,
    /// The device's local store.
    pub local: Arc<L>,
    /// The device's handle on the shared remote store.
    pub remote: Arc<InMemoryRemoteStore>,
    /// Clock shared by every device connected through this one.
    pub clock: Arc<ManualClock>,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestDevice<InMemoryLocalStore> {
    /// Creates a device with an in-memory local store and default config.
    pub fn memory() -> Self {
        Self::memory_with(SyncConfig::default())
    }

    /// Creates a device with an in-memory local store.
    pub fn memory_with(config: SyncConfig) -> Self {
        Self::assemble(
            config,
            Arc::new(InMemoryLocalStore::new()),
            Arc::new(InMemoryRemoteStore::new()),
            Arc::new(ManualClock::default()),
            None,
        )
    }

    /// Creates a device whose remote store echoes its own writes back to it.
    pub fn echoing() -> Self {
        Self::assemble(
            SyncConfig::default(),
            Arc::new(InMemoryLocalStore::new()),
            Arc::new(InMemoryRemoteStore::new().with_echo(true)),
            Arc::new(ManualClock::default()),
            None,
        )
    }
}

impl TestDevice<FileLocalStore> {
    /// Creates a device whose local store is a JSON file in a temp directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let local = FileLocalStore::open_with_create_dirs(&temp_dir.path().join("local.json"))
            .expect("Failed to open file store");
        Self::assemble(
            SyncConfig::default(),
            Arc::new(local),
            Arc::new(InMemoryRemoteStore::new()),
            Arc::new(ManualClock::default()),
            Some(temp_dir),
        )
    }
}

impl<L: LocalStore + 'static> TestDevice<L> {
    fn assemble(
        config: SyncConfig,
        local: Arc<L>,
        remote: Arc<InMemoryRemoteStore>,
        clock: Arc<ManualClock>,
        temp_dir: Option<TempDir>,
    ) -> Self {
        let engine = SyncEngine::with_clock(config, remote.clone(), clock.clone())
            .expect("Test devices must be created inside a tokio runtime");
        Self {
            engine,
            local,
            remote,
            clock,
            _temp_dir: temp_dir,
        }
    }

    /// Creates another device on the same remote store and clock, with its
    /// own in-memory local store.
    pub fn connect(&self, config: SyncConfig) -> TestDevice<InMemoryLocalStore> {
        TestDevice::assemble(
            config,
            Arc::new(InMemoryLocalStore::new()),
            Arc::new(self.remote.connect_device()),
            Arc::clone(&self.clock),
            None,
        )
    }

    /// Returns the key `name` in this device's local store.
    pub fn key(&self, name: &str) -> SyncKey {
        SyncKey::new(name, self.local.clone())
    }

    /// Tracks `names` on this device.
    pub fn track(&self, names: &[&str]) -> Vec<SyncKey> {
        let keys: Vec<_> = names.iter().map(|name| self.key(name)).collect();
        self.engine.add(keys.clone());
        keys
    }

    /// Writes a local value; `None` removes it.
    pub fn write_local(&self, name: &str, value: Option<Value>) {
        let result = match value {
            Some(value) => self.local.set(name, value),
            None => self.local.remove(name),
        };
        result.expect("Failed to write local store");
    }

    /// Reads a local value.
    pub fn read_local(&self, name: &str) -> Option<Value> {
        self.local.get(name).expect("Failed to read local store")
    }

    /// Reads the local timestamp record of `name`.
    pub fn local_timestamp(&self, name: &str) -> Option<Timestamp> {
        let record = self.engine.config().timestamp_key(name);
        self.read_local(&record).as_ref().and_then(Timestamp::from_value)
    }

    /// Reads and decodes the remote entry for `name`.
    pub fn remote_bundle(&self, name: &str) -> Option<RemoteBundle> {
        self.remote
            .get(name)
            .expect("Failed to read remote store")
            .map(|entry| RemoteBundle::decode(name, &entry).expect("Malformed remote entry"))
    }

    /// Writes `[micros, value]` straight into the remote store, bypassing
    /// every engine.
    pub fn seed_remote(&self, name: &str, micros: i64, value: Value) {
        let bundle = RemoteBundle::new(ts(micros), value);
        self.remote
            .set(name, bundle.into_value())
            .expect("Failed to seed remote store");
    }
}

/// Creates two devices sharing one remote store and one clock.
pub fn two_devices() -> (TestDevice, TestDevice) {
    let first = TestDevice::memory();
    let second = first.connect(SyncConfig::default());
    (first, second)
}

/// Shorthand for a valid timestamp.
pub fn ts(micros: i64) -> Timestamp {
    Timestamp::from_micros(micros).expect("Timestamps must be non-negative")
}

/// Waits until no device has queued work, including work queued by another
/// device's notifications while waiting.
pub async fn settle(devices: &[&TestDevice]) {
    loop {
        for device in devices {
            device.engine.sync().await;
        }
        if devices.iter().all(|device| device.engine.pending_tasks() == 0) {
            return;
        }
    }
}

/// Runs `future` to completion on a fresh current-thread runtime.
///
/// For property tests, whose bodies are synchronous.
pub fn block_on<F: Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build tokio runtime")
        .block_on(future)
}
