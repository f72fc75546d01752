//! In-memory storage backend.

use crate::{LocalStorage, StorageError, StorageResult};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Process-local storage. Contents are lost when dropped.
#[derive(Default)]
pub struct MemoryStorage {
    data: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn data(&self) -> StorageResult<MutexGuard<'_, HashMap<String, String>>> {
        self.data
            .lock()
            .map_err(|_| StorageError::Backend("memory storage lock poisoned".to_string()))
    }
}

impl LocalStorage for MemoryStorage {
    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.data()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.data()?.get(key).cloned())
    }

    fn remove(&self, key: &str) -> StorageResult<bool> {
        Ok(self.data()?.remove(key).is_some())
    }
}
