//! Per-task sync context and in-flight operation tracking.

use crate::timestamp::Timestamp;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;

/// Identifies one queued sync operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpId(u64);

impl OpId {
    /// Wraps a raw identifier.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw identifier.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op#{}", self.0)
    }
}

/// The ambient values of one sync task.
///
/// Created once when the task is submitted and passed explicitly to every
/// step it runs. The timestamp tags every write the task makes; the
/// operation id marks the task's remote writes as in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncContext {
    /// Timestamp for every write made by the task.
    pub timestamp: Timestamp,
    /// Identity of the task.
    pub op_id: OpId,
}

/// Remote keys currently being written by our own operations.
///
/// A remote change notification naming one of these keys is the echo of our
/// own write and is ignored.
#[derive(Default)]
pub struct InFlightOps {
    ops: Mutex<HashMap<OpId, Vec<String>>>,
}

impl InFlightOps {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `op_id` is writing `key` until the guard is dropped.
    pub fn begin(&self, op_id: OpId, key: &str) -> InFlightGuard<'_> {
        let mut ops = self.ops.lock();
        ops.entry(op_id).or_default().push(key.to_string());
        InFlightGuard { ops: self, op_id }
    }

    /// Returns true if any in-flight operation is writing `key`.
    pub fn is_in_flight(&self, key: &str) -> bool {
        let ops = self.ops.lock();
        ops.values().any(|keys| keys.iter().any(|k| k == key))
    }

    /// Returns the number of in-flight operations.
    pub fn len(&self) -> usize {
        self.ops.lock().len()
    }

    /// Returns true if nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Ends an in-flight operation on drop.
pub struct InFlightGuard<'a> {
    ops: &'a InFlightOps,
    op_id: OpId,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.ops.ops.lock().remove(&self.op_id);
    }
}
