//! File-backed local store for persistent storage.

use crate::error::{StoreError, StoreResult};
use crate::local::{ChangeEvent, LocalStore, StoreId, WatchOptions};
use crate::memory::WatchableMap;
use crate::subscription::{Callback, WatchToken};
use crate::value::Value;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// A local store persisted as a JSON snapshot.
///
/// The whole key space is kept in memory and rewritten to disk on every
/// mutation. Writes go to a sibling temporary file which is then renamed over
/// the snapshot, so a crash leaves either the old or the new contents.
///
/// # Example
///
/// ```no_run
/// use kvsync_store::{FileLocalStore, LocalStore, Value};
/// use std::path::Path;
///
/// let store = FileLocalStore::open(Path::new("prefs.json")).unwrap();
/// store.set("theme", Value::from("dark")).unwrap();
/// ```
pub struct FileLocalStore {
    id: StoreId,
    path: PathBuf,
    map: WatchableMap,
}

impl FileLocalStore {
    /// Opens the snapshot at `path`, creating an empty store if it is missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let values = match fs::read(path) {
            Ok(bytes) if bytes.is_empty() => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                StoreError::Corrupted(format!("{}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            id: StoreId::next(),
            path: path.to_path_buf(),
            map: WatchableMap::new(values),
        })
    }

    /// Opens the snapshot, creating parent directories if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or the file cannot
    /// be read.
    pub fn open_with_create_dirs(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Returns the path of the snapshot file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns a copy of all entries.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.map.snapshot()
    }

    fn persist(path: &Path, values: &BTreeMap<String, Value>) -> StoreResult<()> {
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer(&mut writer, values)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl LocalStore for FileLocalStore {
    fn id(&self) -> StoreId {
        self.id
    }

    fn get(&self, key: &str) -> StoreResult<Option<Value>> {
        Ok(self.map.get(key))
    }

    fn set(&self, key: &str, value: Value) -> StoreResult<()> {
        self.map.write(key, Some(value), |values| Self::persist(&self.path, values))
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        self.map.write(key, None, |values| Self::persist(&self.path, values))
    }

    fn watch(
        &self,
        key: &str,
        options: WatchOptions,
        callback: Callback<ChangeEvent>,
    ) -> StoreResult<WatchToken> {
        Ok(self.map.watch(key, options, callback))
    }
}
