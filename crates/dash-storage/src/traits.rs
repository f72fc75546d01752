//! Storage trait definitions.

use crate::StorageResult;

/// Trait for client-local storage backends.
///
/// Mirrors the browser `localStorage` surface: string keys, string values.
pub trait LocalStorage: Send + Sync {
    /// Store a value
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Retrieve a value
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Remove a value, returning whether it existed
    fn remove(&self, key: &str) -> StorageResult<bool>;

    /// Check if a key exists
    fn has(&self, key: &str) -> StorageResult<bool> {
        Ok(self.get(key)?.is_some())
    }
}
