// Array Telemetry - storage array telemetry collector
//
// Polls every array listed in a YAML inventory once, concurrently, and writes
// a normalized JSON snapshot (one entry per array) for downstream consumers.
//
// # Usage
// array-telemetry --config <inventory.yaml> [--commands capacity,datastores] [--output data.json]
//
// Example:
// array-telemetry --config /etc/array-telemetry/inventory.yaml --commands capacity,disks,alerts --output -

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use array_telemetry::{
    CollectorRegistry, CommandSet, Inventory, Orchestrator, OutputSink, ServerTarget,
};

/// Command-line arguments
#[derive(Debug, Parser)]
#[command(name = "array-telemetry", version, about = "Collects a normalized telemetry snapshot from storage arrays")]
struct Args {
    /// YAML inventory with settings, credentials and servers
    #[arg(long)]
    config: PathBuf,

    /// Comma-separated telemetry categories (capacity, datastores, disks, alerts, uptime)
    #[arg(long, value_delimiter = ',', default_value = "capacity,datastores")]
    commands: Vec<String>,

    /// Output file; "-" writes to stdout
    #[arg(long, default_value = "data.json")]
    output: String,

    /// Only poll the server with this id (repeatable)
    #[arg(long = "server")]
    servers: Vec<String>,

    /// Abort before contacting any array when a server cannot be resolved
    #[arg(long)]
    strict: bool,
}

/// Application entry point
///
/// This function:
/// 1. Parses command-line arguments
/// 2. Initializes logging
/// 3. Loads the inventory
/// 4. Builds the collector registry and orchestrator
/// 5. Runs one collection round and writes the snapshot
#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging();

    info!("=== Array Telemetry Starting ===");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let inventory = Inventory::load(&args.config)
        .await
        .with_context(|| format!("Failed to load inventory {}", args.config.display()))?;

    for (family, creds) in &inventory.credentials {
        info!("Credentials for {}: {}", family, mask_credentials(&creds.username));
    }

    let commands = requested_commands(&args.commands);
    let targets = select_targets(&inventory, &args.servers)?;

    let registry = CollectorRegistry::with_builtin_adapters(
        inventory.credentials.clone(),
        inventory.settings.clone(),
    );
    if args.strict {
        registry
            .validate(&targets)
            .context("Inventory has servers that cannot be collected (--strict)")?;
    }

    let orchestrator = Orchestrator::new(Arc::new(registry), inventory.settings.server_timeout());
    let results = orchestrator.collect_all(&targets, &commands).await;

    for result in results.iter().filter(|r| !r.is_complete()) {
        for failure in &result.failures {
            warn!(
                "[{}] {} failed ({:?}): {}",
                result.server.id, failure.stage, failure.kind, failure.message
            );
        }
    }

    OutputSink::from_arg(&args.output)
        .write(&results)
        .await
        .context("Failed to write results")?;

    info!(
        "=== Array Telemetry Finished: {}/{} server(s) complete ===",
        results.iter().filter(|r| r.is_complete()).count(),
        results.len()
    );
    Ok(())
}

/// Parses --commands. Unknown names are skipped; with none left the run
/// still collects each server's identity.
fn requested_commands(names: &[String]) -> CommandSet {
    let commands = CommandSet::from_names(names);
    if commands.is_empty() {
        warn!(
            "No known command in --commands {:?}, collecting identity only",
            names
        );
    } else {
        info!(
            "Requested commands: {}",
            commands.iter().map(|c| c.as_str()).collect::<Vec<_>>().join(",")
        );
    }
    commands
}

/// Applies the --server filter; every requested id must exist
fn select_targets(inventory: &Inventory, ids: &[String]) -> Result<Vec<ServerTarget>> {
    for id in ids {
        if !inventory.servers.iter().any(|s| &s.id == id) {
            bail!("Unknown server id '{}'", id);
        }
    }
    let targets = inventory.select(ids);
    info!("Polling {} server(s)", targets.len());
    Ok(targets)
}

/// Initializes the logging subsystem
///
/// Sets up structured logging with:
/// - Timestamp, level and target module for each entry
/// - Colored output when running in a terminal
/// - JSON output when running as a systemd service
///
/// # Log Levels
/// Default: INFO
/// Can be overridden with RUST_LOG environment variable
///
/// # Examples
/// ```bash
/// RUST_LOG=debug array-telemetry --config inventory.yaml
/// RUST_LOG=array_telemetry::collectors=debug array-telemetry --config inventory.yaml
/// ```
fn init_logging() {
    // Systemd sets INVOCATION_ID for units it starts
    let is_systemd = env::var("INVOCATION_ID").is_ok();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // Logs go to stderr so `--output -` keeps stdout clean
    if is_systemd {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

/// Masks an account name for logging
///
/// Keeps the first character so operators can tell accounts apart.
///
/// # Example
/// ```
/// monitor
/// becomes
/// m******
/// ```
fn mask_credentials(username: &str) -> String {
    let mut chars = username.chars();
    match chars.next() {
        Some(first) => std::iter::once(first)
            .chain(chars.map(|_| '*'))
            .collect(),
        None => String::new(),
    }
}
