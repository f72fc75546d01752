//! Configuration, logging, paths, and API URL helpers for the ads dashboard.

mod api_url;
mod config;
mod error;
mod logging;
mod paths;

pub use api_url::{
    join_api_url, join_url_path, normalize_api_base_url, resolve_api_url, DEFAULT_API_BASE_URL,
};
pub use config::{Config, DEFAULT_AUTH_TIMEOUT_MS, DEFAULT_LOG_LEVEL};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, parse_level};
pub use paths::Paths;
