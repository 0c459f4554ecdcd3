//! Session CLI
//!
//! Single-binary host for the session client:
//! 1. Loads configuration (TOML file, env overlay)
//! 2. Restores the persisted session credential
//! 3. Runs one command: login, request, logout, or status
//! 4. With `--metrics`, prints the Prometheus exposition afterwards
//!
//! Command output goes to stdout; logs go to stderr as JSON.

mod config;
mod error;
mod metrics;

use anyhow::{Context, Result};
use reqwest::Method;
use session_auth::{CredentialStore, FileBackend, HttpTokenApi, LoginCredentials, now_millis};
use session_client::{AuthClient, ClientSettings, LogoutReason, SessionListener, SessionState};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transport::{HttpTransport, RequestSpec};

use crate::config::Config;
use crate::error::Error;

const USAGE: &str = "session-cli [--config PATH] [--metrics] <login | logout | status | request METHOD PATH [--data JSON]>";

#[derive(Debug, PartialEq)]
enum Command {
    Login,
    Logout,
    Status,
    Request {
        method: Method,
        path: String,
        body: Option<serde_json::Value>,
    },
}

#[derive(Debug)]
struct Cli {
    config_path: Option<String>,
    metrics: bool,
    command: Command,
}

/// Parse `argv` (program name first) into flags and one command.
fn parse_args(args: &[String]) -> error::Result<Cli> {
    let mut config_path = None;
    let mut metrics = false;
    let mut data = None;
    let mut positional = Vec::new();

    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                let path = iter
                    .next()
                    .ok_or_else(|| Error::Usage("--config needs a path".into()))?;
                config_path = Some(path.clone());
            }
            "--data" => {
                let body = iter
                    .next()
                    .ok_or_else(|| Error::Usage("--data needs a JSON body".into()))?;
                data = Some(serde_json::from_str(body)?);
            }
            "--metrics" => metrics = true,
            other if other.starts_with("--") => {
                return Err(Error::Usage(format!("unknown flag {other:?}")));
            }
            other => positional.push(other),
        }
    }

    let command = match positional.as_slice() {
        ["login"] => Command::Login,
        ["logout"] => Command::Logout,
        ["status"] => Command::Status,
        ["request", method, path] => {
            let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
                .map_err(|_| Error::Usage(format!("invalid method {method:?}")))?;
            Command::Request {
                method,
                path: path.to_string(),
                body: data.take(),
            }
        }
        [] => return Err(Error::Usage(USAGE.into())),
        [other, ..] => {
            return Err(Error::Usage(format!("unknown command {other:?}; {USAGE}")));
        }
    };

    if data.is_some() {
        return Err(Error::Usage("--data is only valid with request".into()));
    }

    Ok(Cli {
        config_path,
        metrics,
        command,
    })
}

/// Reports session changes in the log.
struct LogListener;

impl SessionListener for LogListener {
    fn on_login(&self) {
        info!("session established");
    }

    fn on_logout(&self, reason: LogoutReason) {
        warn!(reason = reason.label(), "session ended, log in again to continue");
    }
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

    let args: Vec<String> = std::env::args().collect();
    let cli = parse_args(&args)?;

    // Install the recorder before the client emits anything
    let prometheus = if cli.metrics {
        Some(metrics::install_recorder().context("failed to install Prometheus recorder")?)
    } else {
        None
    };

    let config_path = Config::resolve_path(cli.config_path.as_deref());
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        base_url = %config.api.base_url,
        storage = %config.storage.path.display(),
        headers = config.headers.len(),
        "configuration loaded"
    );

    let client = build_client(&config).await?;

    let refresh_task = config.auth.proactive_refresh_secs.map(|secs| {
        client.spawn_refresh_task(
            Duration::from_secs(secs),
            Duration::from_secs(config.auth.refresh_threshold_secs),
        )
    });

    let outcome = run(&client, &config, cli.command).await;

    if let Some(task) = refresh_task {
        task.abort();
    }
    if let Some(handle) = prometheus {
        print!("{}", handle.render());
    }
    outcome
}

async fn build_client(config: &Config) -> Result<AuthClient> {
    let timeout = Duration::from_secs(config.api.request_timeout_secs);
    let http = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("failed to build HTTP client")?;

    let transport =
        HttpTransport::new(http.clone(), &config.api.base_url, timeout).with_headers(config.headers.clone());
    let token_api = HttpTokenApi::new(http, config.login_url(), config.refresh_url());

    let backend = FileBackend::new(config.storage.path.clone(), &config.storage.key);
    let store = CredentialStore::open(backend).await.with_context(|| {
        format!(
            "failed to open credential file {}",
            config.storage.path.display()
        )
    })?;

    let settings = ClientSettings {
        refresh_timeout: Duration::from_secs(config.auth.refresh_timeout_secs),
        expired_status: config.auth.expired_status,
    };

    Ok(AuthClient::new(
        settings,
        Arc::new(transport),
        Arc::new(token_api),
        Arc::new(store),
        Arc::new(LogListener),
    ))
}

async fn run(client: &AuthClient, config: &Config, command: Command) -> Result<()> {
    match command {
        Command::Login => {
            let username = config
                .auth
                .username
                .clone()
                .ok_or(Error::MissingSetting("auth.username"))?;
            let password = config
                .auth
                .password
                .clone()
                .ok_or(Error::MissingSetting("password (AUTH_PASSWORD or auth.password_file)"))?;
            client
                .login(&LoginCredentials::new(username, password))
                .await
                .context("login failed")?;
            println!("logged in");
        }
        Command::Logout => {
            client.logout().await.context("logout failed")?;
            println!("logged out");
        }
        Command::Status => {
            println!("{}", status_json(client));
        }
        Command::Request { method, path, body } => {
            let mut request = RequestSpec::new(method, path);
            if let Some(body) = body {
                request = request.with_body(body);
            }
            match client.send(request).await {
                Ok(response) => println!("{}", response.text()),
                Err(session_client::Error::Server(response)) => {
                    anyhow::bail!(
                        "request failed with status {}: {}",
                        response.status,
                        response.text()
                    );
                }
                Err(e) => return Err(e).context("request failed"),
            }
        }
    }
    Ok(())
}

fn state_label(state: SessionState) -> &'static str {
    match state {
        SessionState::Authenticated => "authenticated",
        SessionState::Refreshing => "refreshing",
        SessionState::LoggedOut => "logged_out",
    }
}

/// Session summary for `status`. Never includes token values.
fn status_json(client: &AuthClient) -> serde_json::Value {
    let credential = client.store().get();
    let expires_at = credential.as_ref().map(|c| c.expires_at);
    let expires_in_secs = expires_at.map(|at| at.saturating_sub(now_millis()) / 1000);
    serde_json::json!({
        "state": state_label(client.state()),
        "expires_at": expires_at,
        "expires_in_secs": expires_in_secs,
        "refresh_cycles": client.coordinator().cycles(),
    })
}
