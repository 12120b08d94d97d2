//! Local State - command line access to a local state prefix
//!
//! Reads, writes and watches keys of the same on-disk layout a host process
//! uses, which makes it handy for inspecting or seeding state.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio_stream::StreamExt;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use local_state::{cancel_pair, Config, LocalApi, TaggedValue};

#[derive(Debug, Parser)]
#[command(name = "local-state", version, about = "Inspect and modify local state")]
struct Cli {
    /// Base prefix directory (overrides LOCAL_STATE_PREFIX)
    #[arg(long, global = true)]
    prefix: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the value of a key
    Get { key: String },
    /// Store a text value under a key
    Set { key: String, value: String },
    /// Remove a key
    Rm { key: String },
    /// Print the value of a key every time it changes, until Ctrl+C
    Watch { key: String },
    /// Provision a directory (must end with a separator) and print its path
    Dir { path: String },
    /// Print store statistics as JSON
    Stats,
}

/// Main entry point for the local state CLI.
///
/// # Startup Sequence
/// 1. Parse arguments and load configuration from the environment
/// 2. Initialize tracing subscriber for logging (stderr)
/// 3. Build the API over the configured prefix
/// 4. Run the requested command
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::from_env();
    if let Some(prefix) = cli.prefix.clone() {
        config = config.with_prefix(prefix);
    }

    // Defaults to "info" level, can be overridden with RUST_LOG env var
    let default_filter = if config.debug {
        "local_state=debug"
    } else {
        "local_state=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("Using prefix {}", config.prefix.display());
    let api = LocalApi::from_config(&config);

    match cli.command {
        Command::Get { key } => match api.get(&key).await? {
            Some(value) => println!("{}", render(&value)),
            None => println!("(absent)"),
        },
        Command::Set { key, value } => {
            api.set(&key, Some(TaggedValue::text(&value))).await?;
        }
        Command::Rm { key } => {
            api.set(&key, None).await?;
        }
        Command::Watch { key } => watch(&api, &key).await?,
        Command::Dir { path } => {
            let dir = api.dir(&path).await?;
            println!("{}", dir.display());
        }
        Command::Stats => {
            let stats = api.stats().await;
            println!(
                "{}",
                serde_json::to_string_pretty(&stats).context("serialize stats")?
            );
        }
    }

    Ok(())
}

/// Follows one key until Ctrl+C, printing its value after each notification.
async fn watch(api: &LocalApi, key: &str) -> Result<()> {
    let (canceller, token) = cancel_pair();
    let mut stream = api.watch(key, token).await?;
    eprintln!("Watching {}. Press Ctrl+C to stop.", key);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                canceller.cancel();
                break;
            }
            event = stream.next() => {
                if event.is_none() {
                    warn!("Watch stream for {} ended", key);
                    break;
                }
                let rendered = match api.get(key).await? {
                    Some(value) => render(&value),
                    None => "(absent)".to_string(),
                };
                println!("[{}] {} = {}", Local::now().format("%H:%M:%S"), key, rendered);
            }
        }
    }

    Ok(())
}

/// Text values print as-is, anything else as its schema and size.
fn render(value: &TaggedValue) -> String {
    match value.as_text() {
        Some(text) => text.to_string(),
        None => format!("<{}: {} bytes>", value.schema, value.data.len()),
    }
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping...");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping...");
        }
    }
}
