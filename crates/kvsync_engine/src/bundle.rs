//! The packed `[timestamp, value]` shape stored at every remote entry.

use crate::error::{SyncError, SyncResult};
use crate::timestamp::Timestamp;
use kvsync_store::Value;

/// A value paired with the timestamp of the write that produced it.
///
/// The remote store cannot hold a companion timestamp entry per key, so both
/// travel together as a two-element array: `[timestamp, value]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteBundle {
    /// When the value was written.
    pub timestamp: Timestamp,
    /// The store-native value.
    pub value: Value,
}

impl RemoteBundle {
    /// Creates a bundle.
    pub fn new(timestamp: Timestamp, value: Value) -> Self {
        Self { timestamp, value }
    }

    /// Encodes the bundle as it is stored remotely.
    pub fn into_value(self) -> Value {
        Value::Array(vec![self.timestamp.to_value(), self.value])
    }

    /// Decodes a remote entry for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::MalformedRemoteEntry`] if the entry is not a
    /// two-element array or its first element is not a valid timestamp.
    pub fn decode(key: &str, entry: &Value) -> SyncResult<Self> {
        let items = entry
            .as_array()
            .ok_or_else(|| SyncError::malformed(key, "not an array"))?;

        match items {
            [timestamp, value] => {
                let timestamp = Timestamp::from_value(timestamp)
                    .ok_or_else(|| SyncError::malformed(key, "invalid timestamp"))?;
                Ok(Self::new(timestamp, value.clone()))
            }
            _ => Err(SyncError::malformed(
                key,
                format!("expected 2 elements, found {}", items.len()),
            )),
        }
    }

    /// Reads just the timestamp component of a remote entry.
    pub fn timestamp_of(key: &str, entry: &Value) -> SyncResult<Timestamp> {
        Self::decode(key, entry).map(|bundle| bundle.timestamp)
    }
}
