//! JSON-file storage backend.
//!
//! The whole store is one JSON object (`{"key": "value", ...}`). Every write
//! rewrites the file through a sibling temp file and a rename, so a crash never
//! leaves a half-written store behind.

use crate::{LocalStorage, StorageError, StorageResult};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Durable storage backed by a single JSON file.
pub struct FileStorage {
    path: PathBuf,
    data: Mutex<BTreeMap<String, String>>,
}

impl FileStorage {
    /// Open (or lazily create) the store at `path`.
    ///
    /// A missing file is treated as an empty store; the file is created on the
    /// first write.
    pub fn open(path: impl Into<PathBuf>) -> StorageResult<Self> {
        let path = path.into();
        let data = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            if content.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&content)?
            }
        } else {
            BTreeMap::new()
        };

        debug!(path = %path.display(), entries = data.len(), "Opened file storage");

        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn data(&self) -> StorageResult<MutexGuard<'_, BTreeMap<String, String>>> {
        self.data
            .lock()
            .map_err(|_| StorageError::Backend("file storage lock poisoned".to_string()))
    }

    fn flush(&self, data: &BTreeMap<String, String>) -> StorageResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(data)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

// Writes build the next map, flush it, and only then replace the in-memory
// copy, so a failed flush leaves memory and disk agreeing.
impl LocalStorage for FileStorage {
    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let mut data = self.data()?;
        let mut next = data.clone();
        next.insert(key.to_string(), value.to_string());
        self.flush(&next)?;
        *data = next;
        Ok(())
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.data()?.get(key).cloned())
    }

    fn remove(&self, key: &str) -> StorageResult<bool> {
        let mut data = self.data()?;
        if !data.contains_key(key) {
            return Ok(false);
        }
        let mut next = data.clone();
        next.remove(key);
        self.flush(&next)?;
        *data = next;
        Ok(true)
    }
}
