//! dash-auth - inspect and manage the dashboard's persisted DingTalk session.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use dash_config_and_utils::{init_logging, Config, Paths};
use dash_storage::FileStorage;
use dingtalk_auth::{ApiError, AuthorizationState, AuthorizedClient, SessionStore};
use tracing::debug;
use url::Url;

/// Dashboard session command-line interface.
#[derive(Parser)]
#[command(name = "dash-auth")]
#[command(about = "Inspect and manage the ads dashboard's DingTalk session")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error). Defaults to the configured level.
    #[arg(short, long, global = true, env = "DASH_LOG_LEVEL")]
    log_level: Option<String>,

    /// Base directory for config and session files. Defaults to ~/.ads-dash
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the stored session
    Status,
    /// Clear the stored session
    Logout,
    /// Ask the server who the stored token belongs to
    Whoami,
    /// Re-read the user profile from DingTalk and store it
    RefreshUser,
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    let config = Config::load(&paths).context("failed to load configuration")?;

    init_logging(cli.log_level.as_deref().unwrap_or(&config.log_level));
    debug!(base_dir = %paths.base_dir().display(), "Loaded configuration");

    let storage = FileStorage::open(paths.local_storage_file())
        .with_context(|| format!("failed to open {}", paths.local_storage_file().display()))?;
    let session = Arc::new(SessionStore::new(
        Box::new(storage),
        Arc::new(AuthorizationState::new()),
    ));

    match cli.command {
        Commands::Status => status(&session)?,
        Commands::Logout => {
            session.clear().context("failed to clear session")?;
            println!("Logged out");
        }
        Commands::Whoami => {
            let client = authorized_client(&config, session)?;
            let user = report_unauthorized(client.me().await)?;
            println!("{}", serde_json::to_string_pretty(&user)?);
        }
        Commands::RefreshUser => {
            let client = authorized_client(&config, session)?;
            let user = report_unauthorized(client.refresh_user().await)?;
            println!("{}", serde_json::to_string_pretty(&user)?);
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            println!("effective api base: {}", config.api_base_url());
            println!("effective timeout: {}ms", config.auth_timeout().as_millis());
        }
    }

    Ok(())
}

fn status(session: &SessionStore) -> anyhow::Result<()> {
    match session.load()? {
        Some(stored) => {
            println!("Logged in (token {})", mask_token(&stored.token));
            if let Some(user) = stored.user {
                println!("{}", serde_json::to_string_pretty(&user)?);
            }
        }
        None => println!("Not logged in"),
    }
    Ok(())
}

fn authorized_client(config: &Config, session: Arc<SessionStore>) -> anyhow::Result<AuthorizedClient> {
    let origin = api_origin(config)?;
    session.restore()?;
    Ok(AuthorizedClient::new(&config.api_base_url(), origin, session))
}

/// URL that relative API bases resolve against: the configured page URL, or
/// the API base itself when it is absolute.
fn api_origin(config: &Config) -> anyhow::Result<Url> {
    if let Some(page) = config.page_url()? {
        return Ok(page);
    }
    match Url::parse(&config.api_base_url()) {
        Ok(url) => Ok(url),
        Err(_) => bail!(
            "API base {} is relative; set DASH_PAGE_URL or page_url in the config file",
            config.api_base_url()
        ),
    }
}

fn report_unauthorized<T>(result: Result<T, ApiError>) -> anyhow::Result<T> {
    match result {
        Err(ApiError::Unauthorized) => bail!("session rejected by the server; stored session cleared"),
        other => Ok(other?),
    }
}

fn mask_token(token: &str) -> String {
    let visible: String = token.chars().take(4).collect();
    if token.chars().count() <= 8 {
        return "****".to_string();
    }
    format!("{}****", visible)
}
