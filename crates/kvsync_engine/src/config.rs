//! Configuration for the sync engine.

/// Default suffix appended to a key name to form its local timestamp record.
pub const DEFAULT_TIMESTAMP_SUFFIX: &str = "__kvsync_timestamp";

/// Which timestamp a pull records in the local timestamp record.
///
/// Under `Applied` a pull leaves the local record newer than the remote
/// entry, so the next inferred sync of an unchanged key pushes it back, and
/// the one after pulls again. Each of those rounds rewrites a store and the
/// pushes spend remote write quota. Choose `Remote` when keys are synced
/// repeatedly: after one pull both sides hold the same timestamp and further
/// inferred syncs make no remote writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PullTimestamp {
    /// The timestamp of the task that applied the pull. Repeated inferred
    /// syncs alternate between pull and push.
    #[default]
    Applied,
    /// The timestamp carried by the remote bundle.
    ///
    /// Leaves both sides agreeing on one timestamp, so repeated inferred
    /// syncs of an unchanged key rewrite identical bytes.
    Remote,
}

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Suffix for local timestamp record keys (`name + suffix`).
    pub timestamp_suffix: String,
    /// Ask the remote store to synchronize right after every push.
    pub sync_on_change: bool,
    /// Emit human-readable status lines for every sync transition.
    pub log_status: bool,
    /// Which timestamp a pull records locally. [`PullTimestamp::Remote`]
    /// makes repeated inferred syncs idempotent.
    pub pull_timestamp: PullTimestamp,
    /// Warn about key names the remote store may reject.
    pub validate_key_names: bool,
}

impl SyncConfig {
    /// Creates a new sync configuration with default settings.
    pub fn new() -> Self {
        Self {
            timestamp_suffix: DEFAULT_TIMESTAMP_SUFFIX.to_string(),
            sync_on_change: true,
            log_status: false,
            pull_timestamp: PullTimestamp::Applied,
            validate_key_names: true,
        }
    }

    /// Sets the timestamp record suffix.
    pub fn with_timestamp_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.timestamp_suffix = suffix.into();
        self
    }

    /// Enables or disables the eager remote synchronize after a push.
    pub fn with_sync_on_change(mut self, enabled: bool) -> Self {
        self.sync_on_change = enabled;
        self
    }

    /// Enables or disables status logging.
    pub fn with_log_status(mut self, enabled: bool) -> Self {
        self.log_status = enabled;
        self
    }

    /// Sets which timestamp a pull records.
    pub fn with_pull_timestamp(mut self, policy: PullTimestamp) -> Self {
        self.pull_timestamp = policy;
        self
    }

    /// Enables or disables key name validation warnings.
    pub fn with_key_validation(mut self, enabled: bool) -> Self {
        self.validate_key_names = enabled;
        self
    }

    /// Returns the local timestamp record key for `name`.
    pub fn timestamp_key(&self, name: &str) -> String {
        format!("{name}{}", self.timestamp_suffix)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}
