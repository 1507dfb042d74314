//! lcu-link - command line client for the League client's local API.
//!
//! **watch**: waits for the client, subscribes to its event stream and prints
//! every matching event as one JSON object per line on stdout. Logs go to
//! stderr.
//!
//! **request**: finds the running client and sends a single API request.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use lcu_link::config::{default_config_path, ConfigError, SubscriptionConfig};
use lcu_link::credentials::{CommandLineCredentials, CredentialSource};
use lcu_link::{ClientConfig, Lifecycle, ProcessWatcher, Transport};
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// lcu-link - League client local API client
#[derive(Parser, Debug)]
#[command(name = "lcu-link", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to <config dir>/lcu-link/config.toml)
    #[arg(long, global = true, env = "LCU_LINK_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Stream client events to stdout as JSON lines
    Watch {
        /// Event to subscribe to, as PATH:VERB (e.g. /lol-gameflow/v1/session:Update)
        #[arg(long = "event", value_name = "PATH:VERB")]
        events: Vec<String>,

        /// Exit after the first session instead of following the client
        #[arg(long)]
        no_reconnect: bool,
    },

    /// Send one request to the running client and print the response body
    Request {
        /// HTTP method
        method: String,

        /// API path, e.g. /lol-summoner/v1/current-summoner
        path: String,

        /// JSON request body
        #[arg(long)]
        body: Option<String>,

        /// Seconds to wait for the client process to appear
        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },
}

#[derive(Error, Debug)]
pub enum LcuError {
    #[error(transparent)]
    Client(#[from] lcu_link::Error),

    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("task join error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> Result<(), LcuError> {
    let cli = Cli::parse();
    init_tracing();

    let config = load_config(cli.config)?;

    match cli.command {
        Commands::Watch { events, no_reconnect } => run_watch(config, events, no_reconnect).await,
        Commands::Request {
            method,
            path,
            body,
            timeout,
        } => run_request(config, method, path, body, Duration::from_secs(timeout)).await,
    }
}

/// Tracing goes to stderr; stdout carries event output.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "lcu_link=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(path: Option<PathBuf>) -> Result<ClientConfig, LcuError> {
    match path.or_else(default_config_path) {
        Some(path) => {
            let config = ClientConfig::load_or_default(&path)?;
            tracing::debug!(path = %path.display(), "config loaded");
            Ok(config)
        }
        None => Ok(ClientConfig::default()),
    }
}

// ── Watch ──────────────────────────────────────────────────────────

async fn run_watch(mut config: ClientConfig, events: Vec<String>, no_reconnect: bool) -> Result<(), LcuError> {
    for raw in &events {
        config.subscriptions.push(parse_event(raw)?);
    }
    if no_reconnect {
        config.reconnect = false;
    }

    let subscriptions = std::mem::take(&mut config.subscriptions);
    let lifecycle = Arc::new(Lifecycle::new(config));
    for sub in &subscriptions {
        lifecycle.router().register(&sub.uri, &sub.event_type, |event| {
            let line = event.to_json()?;
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&line)?;
            stdout.write_all(b"\n")?;
            stdout.flush()?;
            Ok(())
        });
    }
    tracing::info!(subscriptions = subscriptions.len(), "waiting for client");

    let stop = lifecycle.stop_handle();
    let runner = {
        let lifecycle = lifecycle.clone();
        tokio::spawn(async move { lifecycle.run().await })
    };
    tokio::pin!(runner);

    tokio::select! {
        result = &mut runner => return Ok(result??),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received Ctrl+C");
            stop.stop();
        }
    }

    Ok(runner.await??)
}

/// Parse `PATH:VERB`. The verb follows the last colon.
fn parse_event(raw: &str) -> Result<SubscriptionConfig, LcuError> {
    match raw.rsplit_once(':') {
        Some((uri, verb)) if uri.starts_with('/') && !verb.is_empty() => Ok(SubscriptionConfig {
            uri: uri.to_string(),
            event_type: verb.to_string(),
        }),
        _ => Err(LcuError::InvalidArgument(format!(
            "expected PATH:VERB, got {:?}",
            raw
        ))),
    }
}

// ── Request ────────────────────────────────────────────────────────

async fn run_request(
    config: ClientConfig,
    method: String,
    path: String,
    body: Option<String>,
    timeout: Duration,
) -> Result<(), LcuError> {
    let method = reqwest::Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .map_err(|_| LcuError::InvalidArgument(format!("bad method {:?}", method)))?;
    let body = body
        .map(|raw| serde_json::from_str::<serde_json::Value>(&raw))
        .transpose()
        .map_err(|e| LcuError::InvalidArgument(format!("body is not JSON: {}", e)))?;

    let watcher = ProcessWatcher::system(config.poll_interval());
    let process = watcher.find_with_timeout(&config.processes.target, timeout).await?;
    let credentials = CommandLineCredentials.credentials(&process)?;
    tracing::debug!(pid = process.pid, port = credentials.port, "client found");

    let transport = Transport::new(Arc::new(credentials), &config.http)?;
    let response = transport.request(method, &path, body.as_ref()).await?;

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&response)?;
    if !response.ends_with(b"\n") {
        stdout.write_all(b"\n")?;
    }
    Ok(())
}
