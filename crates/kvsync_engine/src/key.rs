//! Tracked keys and key name rules.

use crate::error::{SyncError, SyncResult};
use kvsync_store::{LocalStore, StoreId, StoreResult, Value};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Which store holds the authoritative value for a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataSource {
    /// The local store wins; its value is pushed to the remote store.
    Local,
    /// The remote store wins; its value is pulled into the local store.
    Remote,
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSource::Local => f.write_str("local"),
            DataSource::Remote => f.write_str("remote"),
        }
    }
}

/// A named value in a particular local store, mirrored to the remote store
/// under the same name.
///
/// Identity is the pair `(name, local store identity)`; the default value
/// does not take part in equality or hashing.
#[derive(Clone)]
pub struct SyncKey {
    name: Arc<str>,
    store: Arc<dyn LocalStore>,
    default: Option<Arc<Value>>,
}

impl SyncKey {
    /// Creates a key named `name` living in `store`.
    pub fn new(name: impl Into<String>, store: Arc<dyn LocalStore>) -> Self {
        Self {
            name: Arc::from(name.into()),
            store,
            default: None,
        }
    }

    /// Attaches a fallback returned by [`SyncKey::value`] when the key is unset.
    ///
    /// The default is never written to either store.
    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(Arc::new(value));
        self
    }

    /// Returns the key name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the local store holding this key.
    pub fn store(&self) -> &Arc<dyn LocalStore> {
        &self.store
    }

    /// Returns the identity of the local store.
    pub fn store_id(&self) -> StoreId {
        self.store.id()
    }

    /// Returns the default value, if any.
    pub fn default_value(&self) -> Option<&Value> {
        self.default.as_deref()
    }

    /// Reads the local value, falling back to the default.
    pub fn value(&self) -> StoreResult<Option<Value>> {
        let value = self.store.get(&self.name)?;
        Ok(value.or_else(|| self.default_value().cloned()))
    }
}

impl PartialEq for SyncKey {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.store_id() == other.store_id()
    }
}

impl Eq for SyncKey {}

impl Hash for SyncKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.store_id().hash(state);
    }
}

impl fmt::Debug for SyncKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncKey")
            .field("name", &self.name)
            .field("store", &self.store_id())
            .finish()
    }
}

impl fmt::Display for SyncKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Checks that `name` is safe to use as a remote key.
///
/// Names must be ASCII, must not start with `@`, and must not contain `.`.
///
/// # Errors
///
/// Returns [`SyncError::InvalidKeyName`] describing the first rule broken.
pub fn validate_key_name(name: &str) -> SyncResult<()> {
    let reason = if name.is_empty() {
        Some("must not be empty")
    } else if !name.is_ascii() {
        Some("must be ASCII")
    } else if name.starts_with('@') {
        Some("must not start with '@'")
    } else if name.contains('.') {
        Some("must not contain '.'")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(SyncError::InvalidKeyName {
            name: name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvsync_store::InMemoryLocalStore;
    use std::collections::HashSet;

    #[test]
    fn identity_is_name_and_store() {
        let a = Arc::new(InMemoryLocalStore::new());
        let b = Arc::new(InMemoryLocalStore::new());

        let k1 = SyncKey::new("theme", a.clone());
        let k2 = SyncKey::new("theme", a.clone()).with_default(Value::from("light"));
        let k3 = SyncKey::new("theme", b);
        let k4 = SyncKey::new("volume", a);

        assert_eq!(k1, k2);
        assert_ne!(k1, k3);
        assert_ne!(k1, k4);

        let set: HashSet<_> = [k1, k2, k3, k4].into_iter().collect();
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn value_falls_back_to_default() {
        let store = Arc::new(InMemoryLocalStore::new());
        let key = SyncKey::new("theme", store.clone()).with_default(Value::from("0"));

        assert_eq!(key.value().unwrap(), Some(Value::from("0")));
        assert_eq!(store.get("theme").unwrap(), None);

        store.set("theme", Value::from("2")).unwrap();
        assert_eq!(key.value().unwrap(), Some(Value::from("2")));
    }

    #[test]
    fn key_name_rules() {
        assert!(validate_key_name("theme_color").is_ok());
        assert!(validate_key_name("").is_err());
        assert!(validate_key_name("thème").is_err());
        assert!(validate_key_name("@theme").is_err());
        assert!(validate_key_name("ui.theme").is_err());
        assert!(validate_key_name("a@b").is_ok());
    }

    #[test]
    fn data_source_display() {
        assert_eq!(DataSource::Local.to_string(), "local");
        assert_eq!(DataSource::Remote.to_string(), "remote");
    }
}
