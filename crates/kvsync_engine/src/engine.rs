//! The sync engine.

use crate::bundle::RemoteBundle;
use crate::config::{PullTimestamp, SyncConfig};
use crate::context::{InFlightOps, OpId, SyncContext};
use crate::error::{SyncError, SyncResult};
use crate::key::{validate_key_name, DataSource, SyncKey};
use crate::listener::RemoteChangeListener;
use crate::queue::TaskQueue;
use crate::registry::KeyRegistry;
use crate::status::{SyncStats, SyncStatus};
use crate::timestamp::{Clock, SystemClock, Timestamp};
use crate::watcher::LocalChangeWatcher;
use kvsync_store::RemoteStore;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

/// Tracing target of the human-readable status stream.
pub const STATUS_TARGET: &str = "kvsync::status";

/// State shared between the engine handle, its queued tasks and its store
/// callbacks.
///
/// Tasks hold strong references; store callbacks hold weak ones.
pub(crate) struct EngineInner {
    pub(crate) config: SyncConfig,
    remote: Arc<dyn RemoteStore>,
    clock: Arc<dyn Clock>,
    pub(crate) registry: KeyRegistry,
    pub(crate) queue: TaskQueue,
    pub(crate) in_flight: InFlightOps,
    watcher: LocalChangeWatcher,
    listener: Mutex<Option<RemoteChangeListener>>,
    status: RwLock<SyncStatus>,
    pub(crate) stats: RwLock<SyncStats>,
    next_op: AtomicU64,
}

impl EngineInner {
    /// Issues the context for a task about to be submitted.
    pub(crate) fn next_context(&self) -> SyncContext {
        SyncContext {
            timestamp: self.clock.now(),
            op_id: OpId::new(self.next_op.fetch_add(1, Ordering::Relaxed)),
        }
    }

    /// Queues one sync of `key`. A `None` source is resolved when the task runs.
    pub(crate) fn submit_sync(
        self: &Arc<Self>,
        key: SyncKey,
        source: Option<DataSource>,
        ctx: SyncContext,
    ) {
        let engine = Arc::clone(self);
        self.queue.submit(async move { engine.sync_key(&key, source, ctx) });
    }

    /// Runs one sync of `key`. Never fails; errors are logged and counted.
    ///
    /// With `log_status` set, every run emits three status lines on
    /// [`STATUS_TARGET`]: idle, syncing, completed.
    pub(crate) fn sync_key(&self, key: &SyncKey, source: Option<DataSource>, ctx: SyncContext) {
        let source = source.unwrap_or_else(|| self.latest_data_source(key));
        self.transition(key, source, SyncStatus::Idle);
        self.transition(key, source, SyncStatus::Syncing);

        let result = match source {
            DataSource::Local => self.sync_from_local(key, ctx),
            DataSource::Remote => self.sync_from_remote(key, ctx),
        };
        if let Err(err) = result {
            self.record_failure(key, &err);
        }

        self.stats.write().last_sync_time = Some(Instant::now());
        self.transition(key, source, SyncStatus::Completed);
    }

    fn transition(&self, key: &SyncKey, source: DataSource, status: SyncStatus) {
        *self.status.write() = status;
        if self.config.log_status {
            info!(target: STATUS_TARGET, "key '{}' from {}: {}", key, source, status);
        }
    }

    /// Overwrites the local value with the remote one.
    ///
    /// The key is marked as applying remote state for the duration, so the
    /// local write this causes is not pushed back.
    fn sync_from_remote(&self, key: &SyncKey, ctx: SyncContext) -> SyncResult<()> {
        let _applying = self.registry.begin_applying(key);

        let Some(bundle) = self.read_bundle(key)? else {
            debug!(key = %key, "no usable remote entry; keeping local value");
            self.stats.write().skipped_pulls += 1;
            return Ok(());
        };

        key.store().set(key.name(), bundle.value)?;
        let recorded = match self.config.pull_timestamp {
            PullTimestamp::Applied => ctx.timestamp,
            PullTimestamp::Remote => bundle.timestamp,
        };
        self.write_local_timestamp(key, recorded)?;

        self.stats.write().pulls += 1;
        debug!(key = %key, timestamp = %recorded, "pulled remote value");
        Ok(())
    }

    /// Pushes the local value, or the local deletion, to the remote store.
    fn sync_from_local(&self, key: &SyncKey, ctx: SyncContext) -> SyncResult<()> {
        let _in_flight = self.in_flight.begin(ctx.op_id, key.name());

        match key.store().get(key.name())? {
            Some(value) => {
                let bundle = RemoteBundle::new(ctx.timestamp, value);
                self.remote.set(key.name(), bundle.into_value())?;
                self.stats.write().pushes += 1;
                debug!(key = %key, timestamp = %ctx.timestamp, "pushed local value");
            }
            None => {
                self.remote.remove(key.name())?;
                self.stats.write().remote_deletions += 1;
                debug!(key = %key, "propagated local deletion");
            }
        }

        if self.config.sync_on_change && !self.remote.synchronize() {
            debug!(key = %key, "remote synchronize did not complete");
        }
        Ok(())
    }

    /// Decides which store holds the newer copy of `key`.
    ///
    /// A missing or malformed remote entry means local wins; a missing local
    /// timestamp means remote wins; equal timestamps resolve to remote.
    pub(crate) fn latest_data_source(&self, key: &SyncKey) -> DataSource {
        let Some(remote) = self.remote_timestamp(key) else {
            return DataSource::Local;
        };
        let Some(local) = self.local_timestamp(key) else {
            return DataSource::Remote;
        };
        if local > remote {
            DataSource::Local
        } else {
            DataSource::Remote
        }
    }

    /// Reads the remote bundle. Absent and malformed entries both read as `None`.
    fn read_bundle(&self, key: &SyncKey) -> SyncResult<Option<RemoteBundle>> {
        let Some(entry) = self.remote.get(key.name())? else {
            return Ok(None);
        };
        match RemoteBundle::decode(key.name(), &entry) {
            Ok(bundle) => Ok(Some(bundle)),
            Err(err) => {
                warn!(key = %key, error = %err, "ignoring malformed remote entry");
                self.stats.write().malformed_entries += 1;
                Ok(None)
            }
        }
    }

    pub(crate) fn remote_timestamp(&self, key: &SyncKey) -> Option<Timestamp> {
        match self.read_bundle(key) {
            Ok(bundle) => bundle.map(|bundle| bundle.timestamp),
            Err(err) => {
                self.record_failure(key, &err);
                None
            }
        }
    }

    pub(crate) fn local_timestamp(&self, key: &SyncKey) -> Option<Timestamp> {
        match key.store().get(&self.config.timestamp_key(key.name())) {
            Ok(value) => value.as_ref().and_then(Timestamp::from_value),
            Err(err) => {
                self.record_failure(key, &err.into());
                None
            }
        }
    }

    pub(crate) fn write_local_timestamp(
        &self,
        key: &SyncKey,
        timestamp: Timestamp,
    ) -> SyncResult<()> {
        let record = self.config.timestamp_key(key.name());
        key.store().set(&record, timestamp.to_value())?;
        Ok(())
    }

    /// Rewrites the timestamp half of the remote bundle, keeping its value.
    fn write_remote_timestamp(&self, key: &SyncKey, timestamp: Timestamp) -> SyncResult<()> {
        let Some(bundle) = self.read_bundle(key)? else {
            debug!(key = %key, "no remote entry to restamp");
            return Ok(());
        };
        let restamped = RemoteBundle::new(timestamp, bundle.value);
        self.remote.set(key.name(), restamped.into_value())?;
        Ok(())
    }

    pub(crate) fn record_failure(&self, key: &SyncKey, err: &SyncError) {
        warn!(key = %key, error = %err, "sync step failed; will retry on next trigger");
        let mut stats = self.stats.write();
        stats.failures += 1;
        stats.last_error = Some(err.to_string());
    }

    fn shutdown(&self) {
        self.watcher.unwatch_all();
        self.listener.lock().take();
    }
}

/// Keeps a set of keys consistent between local stores and one remote store.
///
/// Every sync runs on a single FIFO [`TaskQueue`], so work triggered by API
/// calls, local edits and remote notifications is totally ordered. Conflicts
/// are resolved per key by comparing the local timestamp record with the
/// timestamp packed into the remote entry; the newer side wins and ties go
/// to the remote store.
///
/// None of the sync operations return errors. Store failures are logged,
/// counted in [`SyncStats`], and retried on the next trigger.
///
/// Dropping the engine stops observing both stores. Tasks already queued
/// still run.
///
/// # Example
///
/// ```rust
/// use kvsync_engine::{SyncConfig, SyncEngine, SyncKey};
/// use kvsync_store::{InMemoryLocalStore, InMemoryRemoteStore, LocalStore, Value};
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let local = Arc::new(InMemoryLocalStore::new());
/// let remote = Arc::new(InMemoryRemoteStore::new());
/// let engine = SyncEngine::new(SyncConfig::default(), remote.clone()).unwrap();
///
/// local.set("theme", Value::from("dark")).unwrap();
/// engine.add([SyncKey::new("theme", local.clone())]);
/// engine.sync().await;
///
/// assert!(remote.snapshot().contains_key("theme"));
/// # }
/// ```
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    /// Creates an engine on the current tokio runtime using the system clock.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NoRuntime`] when called outside a tokio runtime.
    pub fn new(config: SyncConfig, remote: Arc<dyn RemoteStore>) -> SyncResult<Self> {
        Self::with_clock(config, remote, Arc::new(SystemClock::new()))
    }

    /// Creates an engine on the current tokio runtime using `clock`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NoRuntime`] when called outside a tokio runtime.
    pub fn with_clock(
        config: SyncConfig,
        remote: Arc<dyn RemoteStore>,
        clock: Arc<dyn Clock>,
    ) -> SyncResult<Self> {
        let queue = TaskQueue::new()?;
        Ok(Self::build(config, remote, clock, queue))
    }

    /// Creates an engine whose queue runs on `handle`.
    pub fn with_handle(
        config: SyncConfig,
        remote: Arc<dyn RemoteStore>,
        clock: Arc<dyn Clock>,
        handle: &Handle,
    ) -> Self {
        Self::build(config, remote, clock, TaskQueue::with_handle(handle))
    }

    fn build(
        config: SyncConfig,
        remote: Arc<dyn RemoteStore>,
        clock: Arc<dyn Clock>,
        queue: TaskQueue,
    ) -> Self {
        let inner = Arc::new(EngineInner {
            config,
            remote,
            clock,
            registry: KeyRegistry::new(),
            queue,
            in_flight: InFlightOps::new(),
            watcher: LocalChangeWatcher::new(),
            listener: Mutex::new(None),
            status: RwLock::new(SyncStatus::Idle),
            stats: RwLock::new(SyncStats::default()),
            next_op: AtomicU64::new(1),
        });

        match RemoteChangeListener::attach(inner.remote.as_ref(), Arc::downgrade(&inner)) {
            Ok(listener) => *inner.listener.lock() = Some(listener),
            Err(err) => warn!(error = %err, "remote change notifications unavailable"),
        }

        info!(
            sync_on_change = inner.config.sync_on_change,
            pull_timestamp = ?inner.config.pull_timestamp,
            "sync engine started"
        );
        Self { inner }
    }

    /// Starts tracking `keys`.
    ///
    /// Each key is observed for local changes and gets one sync, with the
    /// source inferred when the sync runs. Adding a tracked key again only
    /// queues another sync.
    pub fn add(&self, keys: impl IntoIterator<Item = SyncKey>) {
        for key in keys {
            if self.inner.config.validate_key_names {
                if let Err(err) = validate_key_name(key.name()) {
                    warn!(key = %key, error = %err, "key name may be rejected by the remote store");
                }
            }

            if self.inner.registry.insert(key.clone()) {
                if let Err(err) = self.inner.watcher.watch(&key, Arc::downgrade(&self.inner)) {
                    self.inner.record_failure(&key, &err);
                }
                debug!(key = %key, watched = self.inner.watcher.len(), "tracking key");
            }

            let ctx = self.inner.next_context();
            self.inner.submit_sync(key, None, ctx);
        }
    }

    /// Stops tracking `keys`. Stored values are left in place.
    pub fn remove<'a>(&self, keys: impl IntoIterator<Item = &'a SyncKey>) {
        for key in keys {
            if self.inner.registry.remove(key) {
                self.inner.watcher.unwatch(key);
                debug!(key = %key, "stopped tracking key");
            }
        }
    }

    /// Stops tracking every key. Stored values are left in place.
    pub fn remove_all(&self) {
        let removed = self.inner.registry.clear();
        self.inner.watcher.unwatch_all();
        debug!(count = removed.len(), "stopped tracking all keys");
    }

    /// Queues one sync per key without waiting for it.
    ///
    /// `None` keys means every tracked key. `None` source means the source is
    /// inferred with [`SyncEngine::latest_data_source`] when the task runs.
    pub fn sync_without_waiting(&self, keys: Option<&[SyncKey]>, source: Option<DataSource>) {
        let keys = match keys {
            Some(keys) => keys.to_vec(),
            None => self.inner.registry.keys(),
        };
        for key in keys {
            let ctx = self.inner.next_context();
            self.inner.submit_sync(key, source, ctx);
        }
    }

    /// Waits until every sync queued before this call has finished.
    pub async fn sync(&self) {
        self.inner.queue.flush().await;
    }

    /// Overwrites only the timestamp of `key` in the store named by `source`.
    ///
    /// Applied immediately, outside the queue. Restamping a remote entry that
    /// is absent or malformed does nothing.
    pub fn record_timestamp(&self, key: &SyncKey, timestamp: Timestamp, source: DataSource) {
        let result = match source {
            DataSource::Local => self.inner.write_local_timestamp(key, timestamp),
            DataSource::Remote => self.inner.write_remote_timestamp(key, timestamp),
        };
        match result {
            Ok(()) => debug!(key = %key, %source, %timestamp, "recorded timestamp"),
            Err(err) => self.inner.record_failure(key, &err),
        }
    }

    /// Returns which store currently holds the newer copy of `key`.
    pub fn latest_data_source(&self, key: &SyncKey) -> DataSource {
        self.inner.latest_data_source(key)
    }

    /// Asks the remote store to refresh. Call when the process comes to the
    /// foreground.
    pub fn on_foreground(&self) -> bool {
        let refreshed = self.inner.remote.synchronize();
        debug!(refreshed, "foreground refresh of the remote store");
        refreshed
    }

    /// Returns tracked keys in registration order.
    pub fn keys(&self) -> Vec<SyncKey> {
        self.inner.registry.keys()
    }

    /// Returns true if `key` is tracked.
    pub fn contains(&self, key: &SyncKey) -> bool {
        self.inner.registry.contains(key)
    }

    /// Returns the status of the most recent sync.
    pub fn status(&self) -> SyncStatus {
        *self.inner.status.read()
    }

    /// Returns a snapshot of the sync statistics.
    pub fn stats(&self) -> SyncStats {
        self.inner.stats.read().clone()
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Returns the number of queued or running sync tasks.
    pub fn pending_tasks(&self) -> usize {
        self.inner.queue.pending()
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}
