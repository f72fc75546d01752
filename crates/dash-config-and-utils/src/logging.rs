//! Logging initialization.
//!
//! Every binary calls [`init_logging`] once at startup and uses the standard
//! `tracing` macros afterwards. `RUST_LOG` wins over the configured level.
//! Set `DASH_LOG_FORMAT=json` for JSONL output on stderr.

use tracing_subscriber::EnvFilter;

const ENV_LOG_FORMAT: &str = "DASH_LOG_FORMAT";

/// Initialize the global tracing subscriber.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(parse_level(level).as_str().to_ascii_lowercase()));

    let json = std::env::var(ENV_LOG_FORMAT)
        .map(|value| value.trim().eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let result = if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .compact()
            .try_init()
    };

    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

/// Parse a log level string into a tracing Level.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.trim().to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}
