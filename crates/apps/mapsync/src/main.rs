use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use catalog::{LayerOrigin, LayerRecord};
use clap::{Parser, Subcommand};
use layers::ResolvedDefinitions;
use reconcile::SyncConfig;
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod scenario;

#[derive(Parser, Debug)]
#[command(author, version, about = "Map layer synchronization replay tool")]
struct Args {
    /// JSON config file (retry, readiness, settle, defaults)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Tile URL template for derived sources; `{key}` is the layer key
    #[arg(long)]
    tile_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay a scenario against an in-memory engine and print the engine calls
    Replay {
        /// Scenario JSON file
        scenario: PathBuf,
    },

    /// Print the definitions each persisted layer record resolves to
    Resolve {
        /// JSON array of layer records
        layers: PathBuf,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = real_main().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn real_main() -> Result<(), String> {
    let args = Args::parse();
    let mut config = load_config(args.config.as_deref())?;
    env_overrides(&mut config, |key| env::var(key).ok());
    if let Some(tile_url) = args.tile_url {
        config.defaults.tile_url_template = tile_url;
    }

    match args.command {
        Command::Replay { scenario } => cmd_replay(&scenario, &config).await,
        Command::Resolve { layers } => cmd_resolve(&layers, &config),
    }
}

fn load_config(path: Option<&Path>) -> Result<SyncConfig, String> {
    let Some(path) = path else {
        return Ok(SyncConfig::default());
    };
    let raw = fs::read_to_string(path).map_err(|e| format!("read {path:?}: {e}"))?;
    let config = SyncConfig::from_json(&raw).map_err(|e| format!("parse {path:?}: {e}"))?;
    info!("Loaded config from {path:?}");
    Ok(config)
}

fn env_overrides(config: &mut SyncConfig, var: impl Fn(&str) -> Option<String>) {
    let u64_var = |key: &str, default: u64| {
        var(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    };
    config.retry.initial_delay_ms =
        u64_var("MAPSYNC_RETRY_DELAY_MS", config.retry.initial_delay_ms);
    config.retry.max_attempts = var("MAPSYNC_MAX_RETRIES")
        .and_then(|v| v.parse().ok())
        .unwrap_or(config.retry.max_attempts);
    config.settle.empty_ms = u64_var("MAPSYNC_SETTLE_EMPTY_MS", config.settle.empty_ms);
    config.settle.populated_ms = u64_var("MAPSYNC_SETTLE_MS", config.settle.populated_ms);
    if let Some(url) = var("MAPSYNC_TILE_URL") {
        config.defaults.tile_url_template = url;
    }
}

async fn cmd_replay(path: &Path, config: &SyncConfig) -> Result<(), String> {
    let raw = fs::read_to_string(path).map_err(|e| format!("read {path:?}: {e}"))?;
    let scenario = scenario::Scenario::parse(&raw)?;
    let output = scenario::replay(scenario, config).await?;
    print_json(&output)
}

fn cmd_resolve(path: &Path, config: &SyncConfig) -> Result<(), String> {
    let raw = fs::read_to_string(path).map_err(|e| format!("read {path:?}: {e}"))?;
    let records: Vec<LayerRecord> =
        serde_json::from_str(&raw).map_err(|e| format!("parse {path:?}: {e}"))?;

    let mut resolved = Vec::with_capacity(records.len());
    for record in &records {
        let origin = match LayerOrigin::from_record(record) {
            Ok(origin) => origin,
            Err(e) => {
                warn!("{e}");
                continue;
            }
        };
        let desired = origin.into_desired(None);
        let ResolvedDefinitions { source, layer } = config.defaults.resolve(&desired);
        resolved.push(json!({
            "key": desired.key,
            "visible": desired.effective_visible(),
            "source_id": desired.key.source_id(),
            "source": source,
            "layer": layer,
        }));
    }
    print_json(&resolved)
}

fn print_json(value: &impl serde::Serialize) -> Result<(), String> {
    let text = serde_json::to_string_pretty(value).map_err(|e| format!("serialize: {e}"))?;
    println!("{text}");
    Ok(())
}
