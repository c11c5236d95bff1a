//! Remote change notifications.

use crate::context::SyncContext;
use crate::engine::EngineInner;
use crate::error::SyncResult;
use crate::key::{DataSource, SyncKey};
use kvsync_store::{ChangeReason, ExternalChange, RemoteStore, WatchToken};
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

/// The engine's subscription to the remote store's change notifications.
///
/// Dropping the listener unsubscribes.
pub(crate) struct RemoteChangeListener {
    _token: WatchToken,
}

impl RemoteChangeListener {
    /// Subscribes `engine` to external changes of `remote`.
    pub(crate) fn attach(remote: &dyn RemoteStore, engine: Weak<EngineInner>) -> SyncResult<Self> {
        let token = remote.subscribe(Arc::new(move |change: &ExternalChange| {
            if let Some(engine) = engine.upgrade() {
                engine.on_external_change(change);
            }
        }))?;
        debug!("listening for remote changes");
        Ok(Self { _token: token })
    }
}

impl EngineInner {
    /// Reacts to a batch of remote key changes.
    ///
    /// Keys our own in-flight pushes are writing are echoes and dropped. For
    /// every remaining tracked key a task is queued that pulls only if the
    /// remote timestamp is strictly newer than the local one at the time the
    /// task runs.
    pub(crate) fn on_external_change(self: &Arc<Self>, change: &ExternalChange) {
        match change.reason {
            ChangeReason::QuotaViolation => {
                warn!(keys = ?change.keys, "remote store reported a quota violation");
            }
            ChangeReason::AccountChange => {
                debug!(keys = ?change.keys, "remote account changed");
            }
            ChangeReason::ServerChange | ChangeReason::InitialSync => {}
        }

        let mut names = Vec::with_capacity(change.keys.len());
        for name in &change.keys {
            if self.in_flight.is_in_flight(name) {
                trace!(key = %name, "echo of our own write; ignoring");
                self.stats.write().suppressed_echoes += 1;
            } else {
                names.push(name.as_str());
            }
        }

        for key in self.registry.keys_named(names) {
            let ctx = self.next_context();
            let engine = Arc::clone(self);
            self.queue.submit(async move { engine.pull_if_newer(&key, ctx) });
        }
    }

    /// Pulls `key` if the remote copy is strictly newer than the local one.
    fn pull_if_newer(&self, key: &SyncKey, ctx: SyncContext) {
        let remote = self.remote_timestamp(key);
        let local = self.local_timestamp(key);
        let newer = match (remote, local) {
            (Some(remote), Some(local)) => remote > local,
            (Some(_), None) => true,
            (None, _) => false,
        };

        if newer {
            self.sync_key(key, Some(DataSource::Remote), ctx);
        } else {
            trace!(
                key = %key,
                remote = ?remote.map(|ts| ts.as_micros()),
                local = ?local.map(|ts| ts.as_micros()),
                "remote copy is not newer; skipping"
            );
            self.stats.write().skipped_pulls += 1;
        }
    }
}
