//! Sync timestamps and clocks.

use kvsync_store::Value;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A point in time, in microseconds since the UNIX epoch.
///
/// Stored in both stores as a non-negative [`Value::Integer`]; anything else
/// is an invalid timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(i64);

impl Timestamp {
    /// The UNIX epoch.
    pub const EPOCH: Timestamp = Timestamp(0);

    /// Creates a timestamp, rejecting negative values.
    pub fn from_micros(micros: i64) -> Option<Self> {
        (micros >= 0).then_some(Self(micros))
    }

    /// Returns microseconds since the UNIX epoch.
    pub fn as_micros(self) -> i64 {
        self.0
    }

    /// Reads the wall clock.
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_micros()).unwrap_or(i64::MAX))
            .unwrap_or(0);
        Self(micros)
    }

    /// Encodes as a store-native value.
    pub fn to_value(self) -> Value {
        Value::Integer(self.0)
    }

    /// Decodes a store-native value, returning `None` if it is not a valid
    /// timestamp.
    pub fn from_value(value: &Value) -> Option<Self> {
        value.as_integer().and_then(Self::from_micros)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}us", self.0)
    }
}

/// Source of timestamps for sync contexts.
pub trait Clock: Send + Sync {
    /// Returns a timestamp strictly greater than any previously returned.
    fn now(&self) -> Timestamp;
}

/// Wall clock that never repeats or goes backwards.
///
/// If the system clock stalls or steps back, readings continue one
/// microsecond after the previous one.
#[derive(Debug, Default)]
pub struct SystemClock {
    last: AtomicI64,
}

impl SystemClock {
    /// Creates a new system clock.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let wall = Timestamp::now().as_micros();
        let previous = self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(wall.max(last.saturating_add(1)))
            })
            .unwrap_or(wall);
        Timestamp(wall.max(previous.saturating_add(1)))
    }
}

/// Deterministic clock for tests.
///
/// Each reading returns the current value and then advances it by one
/// microsecond.
#[derive(Debug)]
pub struct ManualClock {
    next: AtomicI64,
}

impl ManualClock {
    /// Creates a clock whose first reading is `start`.
    pub fn starting_at(start: Timestamp) -> Self {
        Self {
            next: AtomicI64::new(start.as_micros()),
        }
    }

    /// Moves the next reading to `timestamp`.
    pub fn set(&self, timestamp: Timestamp) {
        self.next.store(timestamp.as_micros(), Ordering::SeqCst);
    }

    /// Moves the next reading forward by `micros`.
    pub fn advance(&self, micros: i64) {
        self.next.fetch_add(micros, Ordering::SeqCst);
    }

    /// Returns the next reading without consuming it.
    pub fn peek(&self) -> Timestamp {
        Timestamp(self.next.load(Ordering::SeqCst))
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::starting_at(Timestamp(1_000_000))
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.next.fetch_add(1, Ordering::SeqCst))
    }
}
