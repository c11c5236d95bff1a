//! Subscription handles and callback fan-out.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A callback invoked with a borrowed event.
pub type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Handle for an active subscription.
///
/// Dropping the token (or calling [`WatchToken::cancel`]) unregisters the
/// callback. A token that outlives the store it came from is harmless: the
/// store's subscriber table is only referenced weakly.
#[must_use = "dropping a WatchToken unregisters the subscription"]
pub struct WatchToken {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl WatchToken {
    /// Creates a token that runs `cancel` exactly once when released.
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Creates a token that is not attached to anything.
    pub fn detached() -> Self {
        Self { cancel: None }
    }

    /// Unregisters the subscription now.
    pub fn cancel(mut self) {
        self.release();
    }

    /// Returns true until the token has been released.
    pub fn is_active(&self) -> bool {
        self.cancel.is_some()
    }

    fn release(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for WatchToken {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for WatchToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchToken").field("active", &self.is_active()).finish()
    }
}

struct Entry<E> {
    id: u64,
    topic: Option<String>,
    callback: Callback<E>,
}

/// A thread-safe table of callbacks, optionally filtered by topic.
///
/// Callbacks are invoked after the table lock is released, so a callback may
/// freely subscribe, unsubscribe, or write back into the owning store.
pub struct SubscriberSet<E> {
    entries: Arc<Mutex<Vec<Entry<E>>>>,
    next_id: AtomicU64,
}

impl<E: 'static> SubscriberSet<E> {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a callback. With `topic = None` it receives every event.
    pub fn subscribe(&self, topic: Option<String>, callback: Callback<E>) -> WatchToken {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().push(Entry {
            id,
            topic,
            callback,
        });

        let entries = Arc::downgrade(&self.entries);
        WatchToken::new(move || {
            if let Some(entries) = entries.upgrade() {
                entries.lock().retain(|entry| entry.id != id);
            }
        })
    }

    /// Delivers `event` to callbacks registered for `topic` or for everything.
    pub fn notify(&self, topic: &str, event: &E) {
        let callbacks: Vec<Callback<E>> = self
            .entries
            .lock()
            .iter()
            .filter(|entry| entry.topic.as_deref().map_or(true, |t| t == topic))
            .map(|entry| Arc::clone(&entry.callback))
            .collect();

        for callback in callbacks {
            callback(event);
        }
    }

    /// Delivers `event` to every callback regardless of topic.
    pub fn notify_all(&self, event: &E) {
        let callbacks: Vec<Callback<E>> = self
            .entries
            .lock()
            .iter()
            .map(|entry| Arc::clone(&entry.callback))
            .collect();

        for callback in callbacks {
            callback(event);
        }
    }

    /// Returns the number of registered callbacks.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if nothing is subscribed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E: 'static> Default for SubscriberSet<E> {
    fn default() -> Self {
        Self::new()
    }
}
