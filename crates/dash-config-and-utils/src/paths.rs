//! File system paths for the dashboard's client-local state.

use crate::{CoreError, CoreResult};
use std::path::PathBuf;

/// Directory under the home directory that holds dashboard state.
const BASE_DIR_NAME: &str = ".ads-dash";

/// Manages file system paths for persisted client state.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Base directory (~/.ads-dash)
    base_dir: PathBuf,
}

impl Paths {
    /// Create a new Paths instance rooted at `~/.ads-dash`.
    pub fn new() -> CoreResult<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| CoreError::Path("Could not determine home directory".to_string()))?;

        Ok(Self {
            base_dir: home.join(BASE_DIR_NAME),
        })
    }

    /// Create a new Paths instance with a custom base directory.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Get the base directory (~/.ads-dash).
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Get the config file path (~/.ads-dash/config.json).
    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Get the local storage file path (~/.ads-dash/local-storage.json).
    pub fn local_storage_file(&self) -> PathBuf {
        self.base_dir.join("local-storage.json")
    }

    /// Get the logs directory (~/.ads-dash/logs).
    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// Ensure all required directories exist.
    pub fn ensure_dirs(&self) -> CoreResult<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}
