//! Session CLI
//!
//! Thin command-line front end over `session-client`:
//! 1. Loads config and opens the credential file
//! 2. Wires store, refresh transport, invalidator and coordinator together
//! 3. Runs one command (`login`, `logout`, `refresh`, `request`)
//! 4. Reports a session expiry if the command triggered one

mod config;
mod metrics;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use reqwest::Method;
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use session_auth::{CredentialStore, FileCredentialStore, HttpRefreshTransport, TokenPair};
use session_client::{ApiRequest, AuthenticatedClient, RefreshCoordinator, SessionInvalidator};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

/// Keep an API session authenticated from the command line
#[derive(Debug, Parser)]
#[command(name = "session-cli", version, about, long_about = None)]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, global = true, env = "CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Print Prometheus metrics for this run on exit
    #[arg(long, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, PartialEq, Eq, Subcommand)]
enum Command {
    /// Store a token pair obtained out of band
    Login {
        access_token: String,
        refresh_token: String,
    },
    /// Clear stored credentials
    Logout,
    /// Refresh the token pair now
    Refresh,
    /// Send an authenticated request to the API
    Request {
        /// HTTP method, case-insensitive
        method: String,
        /// Path relative to `api.base_url`
        path: String,
        /// JSON request body
        body: Option<String>,
    },
}

fn build_request(method: &str, path: &str, body: Option<&str>) -> Result<ApiRequest> {
    let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .with_context(|| format!("invalid HTTP method: {method}"))?;
    let mut request = ApiRequest::new(method, path);
    if let Some(body) = body {
        request = request
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .body(body.to_owned());
    }
    Ok(request)
}

async fn run(client: &AuthenticatedClient, command: Command) -> Result<()> {
    match command {
        Command::Login {
            access_token,
            refresh_token,
        } => {
            client
                .login(&TokenPair::new(access_token, refresh_token))
                .context("failed to store credentials")?;
            println!("logged in");
        }
        Command::Logout => {
            client.logout();
            println!("logged out");
        }
        Command::Refresh => {
            if client.coordinator().ensure_fresh_token().await {
                println!("token refreshed");
            } else {
                bail!("token refresh failed");
            }
        }
        Command::Request { method, path, body } => {
            let request = build_request(&method, &path, body.as_deref())?;
            let response = client
                .execute(request)
                .await
                .with_context(|| format!("{method} {path} failed"))?;
            println!("{}", response.status);
            println!("{}", response.text());
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let prometheus = if cli.metrics {
        Some(metrics::install_recorder().context("failed to install metrics recorder")?)
    } else {
        None
    };

    let config_path = Config::resolve_path(cli.config);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        base_url = %config.api.base_url,
        timeout_secs = config.api.timeout_secs,
        "configuration loaded"
    );

    let file_store = FileCredentialStore::open(config.credentials.path.clone()).with_context(|| {
        format!(
            "failed to open credential store at {}",
            config.credentials.path.display()
        )
    })?;
    let credentials_path = file_store.path().display().to_string();
    let store: Arc<dyn CredentialStore> = Arc::new(file_store);

    let http = reqwest::Client::new();
    let transport = HttpRefreshTransport::new(
        http.clone(),
        config.refresh.endpoint.clone(),
        config.refresh_timeout(),
    );
    let refresh_endpoint = transport.endpoint().to_owned();
    let invalidator = SessionInvalidator::new(store.clone());
    let coordinator = RefreshCoordinator::new(
        store.clone(),
        Arc::new(transport),
        invalidator,
        config.invalidation_policy(),
    );

    info!(
        credentials = %credentials_path,
        refresh_endpoint = %refresh_endpoint,
        policy = ?coordinator.policy(),
        "session components ready"
    );

    let client = AuthenticatedClient::new(
        http,
        config.api.base_url.clone(),
        config.api_timeout(),
        store,
        coordinator,
    );

    // Subscribe before running so a signal from this command is not missed
    let mut expired = client.subscribe();
    let is_logout = cli.command == Command::Logout;

    let outcome = run(&client, cli.command).await;

    if !is_logout && expired.try_recv().is_ok() {
        eprintln!("session expired, please log in again");
    }

    if let Some(handle) = prometheus {
        print!("{}", handle.render());
    }

    outcome
}
