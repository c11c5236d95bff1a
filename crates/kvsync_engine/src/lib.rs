//! # kvsync Engine
//!
//! Bidirectional sync between local key-value stores and one quota-limited
//! remote key-value store.
//!
//! This crate provides:
//! - A single-consumer FIFO task queue driving every sync
//! - A registry of tracked keys
//! - Local change observation and remote change notification handling
//! - Timestamp-based conflict resolution per key
//! - Feedback-loop and echo suppression
//!
//! ## Architecture
//!
//! A local write to a tracked key records a fresh timestamp next to the
//! value (under `name + suffix`) and queues a push. A push writes the value
//! to the remote store packed with that timestamp as `[timestamp, value]`.
//! A remote "changed externally" notification queues a pull for each tracked
//! key it names; the pull only happens if the remote timestamp is strictly
//! newer than the local one when the task runs.
//!
//! ## Key Invariants
//!
//! - Tasks run one at a time in submission order, regardless of key or trigger
//! - Every write made by one task carries the same timestamp
//! - A pull never causes a push of the value it wrote
//! - A push never causes a pull of its own echo
//! - Public sync operations never fail; store errors are logged and the
//!   next trigger retries

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bundle;
mod config;
mod context;
mod engine;
mod error;
mod key;
mod listener;
mod queue;
mod registry;
mod status;
mod timestamp;
mod watcher;

pub use bundle::RemoteBundle;
pub use config::{PullTimestamp, SyncConfig, DEFAULT_TIMESTAMP_SUFFIX};
pub use context::{InFlightGuard, InFlightOps, OpId, SyncContext};
pub use engine::{SyncEngine, STATUS_TARGET};
pub use error::{SyncError, SyncResult};
pub use key::{validate_key_name, DataSource, SyncKey};
pub use queue::TaskQueue;
pub use registry::{ApplyingGuard, KeyRegistry};
pub use status::{SyncStats, SyncStatus};
pub use timestamp::{Clock, ManualClock, SystemClock, Timestamp};
