//! Configuration management for the dashboard auth bootstrap.

use crate::{normalize_api_base_url, CoreResult, Paths, DEFAULT_API_BASE_URL};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default per-stage handshake timeout in milliseconds.
pub const DEFAULT_AUTH_TIMEOUT_MS: u64 = 8000;

const ENV_LOG_LEVEL: &str = "DASH_LOG_LEVEL";
const ENV_API_BASE_URL: &str = "DASH_API_BASE_URL";
const ENV_AUTH_TIMEOUT_MS: &str = "DINGTALK_AUTH_TIMEOUT_MS";
const ENV_PAGE_URL: &str = "DASH_PAGE_URL";

/// Dashboard configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// API base URL, either a path (`/api`) or an absolute origin.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Raw handshake timeout. Coerced by [`Config::auth_timeout`].
    #[serde(default = "default_auth_timeout_ms")]
    pub auth_timeout_ms: f64,
    /// URL of the page hosting the dashboard; relative API bases resolve against it.
    #[serde(default)]
    pub page_url: Option<String>,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_auth_timeout_ms() -> f64 {
    DEFAULT_AUTH_TIMEOUT_MS as f64
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            api_base_url: default_api_base_url(),
            auth_timeout_ms: default_auth_timeout_ms(),
            page_url: None,
        }
    }
}

impl Config {
    /// Create a new Config with default values, then override from environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load configuration from the config file, falling back to defaults.
    /// Environment variables take precedence over the file.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    fn load_from_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply overrides from a variable lookup. Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.log_level = level;
        }
        if let Some(base) = lookup(ENV_API_BASE_URL) {
            self.api_base_url = base;
        }
        if let Some(raw) = lookup(ENV_AUTH_TIMEOUT_MS) {
            // Unparsable values become NaN and are coerced later.
            self.auth_timeout_ms = raw.trim().parse::<f64>().unwrap_or(f64::NAN);
        }
        if let Some(page) = lookup(ENV_PAGE_URL) {
            self.page_url = Some(page);
        }
    }

    /// Handshake timeout shared by every stage.
    ///
    /// Non-finite or non-positive values fall back to the 8000 ms default.
    pub fn auth_timeout(&self) -> Duration {
        let ms = self.auth_timeout_ms;
        if ms.is_finite() && ms > 0.0 {
            Duration::from_millis(ms.ceil() as u64)
        } else {
            Duration::from_millis(DEFAULT_AUTH_TIMEOUT_MS)
        }
    }

    /// Normalized API base URL.
    pub fn api_base_url(&self) -> String {
        normalize_api_base_url(&self.api_base_url)
    }

    /// Parsed page URL, if configured.
    pub fn page_url(&self) -> CoreResult<Option<Url>> {
        match self.page_url.as_deref() {
            Some(raw) => Ok(Some(Url::parse(raw)?)),
            None => Ok(None),
        }
    }
}
