//! Local change observation.
//!
//! One subscription per tracked key. The store holds the callback and the
//! callback holds only a weak reference back to the engine, so a dropped
//! engine never keeps its stores' watchers alive and vice versa.

use crate::engine::EngineInner;
use crate::error::SyncResult;
use crate::key::{DataSource, SyncKey};
use kvsync_store::{ChangeEvent, StoreId, WatchOptions, WatchToken};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

/// Subscriptions to local value changes, keyed by tracked key.
#[derive(Default)]
pub(crate) struct LocalChangeWatcher {
    tokens: Mutex<HashMap<SyncKey, WatchToken>>,
}

impl LocalChangeWatcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Starts observing `key`. Observing an already observed key is a no-op.
    pub(crate) fn watch(&self, key: &SyncKey, engine: Weak<EngineInner>) -> SyncResult<()> {
        if self.tokens.lock().contains_key(key) {
            return Ok(());
        }

        let options = WatchOptions::before_and_after();
        let store_id = key.store_id();
        let name = key.name().to_string();
        let token = key.store().watch(
            key.name(),
            options,
            Arc::new(move |event: &ChangeEvent| {
                if event.is_unchanged(options) {
                    trace!(key = %event.key, "ignoring write of an identical value");
                    return;
                }
                if let Some(engine) = engine.upgrade() {
                    engine.on_local_change(store_id, &name);
                }
            }),
        )?;

        // A concurrent watch of the same key may have won; the loser's token
        // drops here.
        self.tokens.lock().entry(key.clone()).or_insert(token);
        debug!(key = %key, store = %store_id, "observing local changes");
        Ok(())
    }

    /// Stops observing `key`.
    pub(crate) fn unwatch(&self, key: &SyncKey) {
        let token = self.tokens.lock().remove(key);
        if token.is_some() {
            debug!(key = %key, "stopped observing local changes");
        }
    }

    /// Stops observing every key.
    pub(crate) fn unwatch_all(&self) {
        let tokens: Vec<_> = self.tokens.lock().drain().collect();
        debug!(count = tokens.len(), "stopped observing all local changes");
    }

    pub(crate) fn len(&self) -> usize {
        self.tokens.lock().len()
    }
}

impl EngineInner {
    /// Reacts to a local write of a tracked key.
    ///
    /// Runs synchronously inside the store's change callback. The fresh local
    /// timestamp is recorded here, before the push is queued, so a pull
    /// decision made in between already sees the local edit as newest.
    pub(crate) fn on_local_change(self: &Arc<Self>, store: StoreId, name: &str) {
        let Some(key) = self.registry.find(store, name) else {
            return;
        };
        if self.registry.is_applying(&key) {
            trace!(key = %key, "local change caused by a pull; not pushing");
            self.stats.write().suppressed_local_changes += 1;
            return;
        }

        let ctx = self.next_context();
        if let Err(err) = self.write_local_timestamp(&key, ctx.timestamp) {
            self.record_failure(&key, &err);
        }
        debug!(key = %key, op = %ctx.op_id, "local change; queueing push");
        self.submit_sync(key, Some(DataSource::Local), ctx);
    }
}
