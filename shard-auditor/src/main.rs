//! Shard Auditor Main Program
//!
//! Implements the complete audit run:
//! 1. Load configuration (file, environment, command line overrides)
//! 2. Collect node ids from the config and an optional node list file
//! 3. Audit every node not yet present in the ledger
//! 4. Log a run summary
//!
//! `show` and `export` read the ledger without touching the network.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use shard_auditor::{
    config,
    ledger::{Ledger, RedbLedger},
    report,
    types::{parse_node_list, AuditorConfig, NodeId, SamplingMode},
    Auditor,
};
use std::io::Read;
use std::path::{Path, PathBuf};
use tokio::signal;
use tracing::{error, info, warn};

/// Storage Network Shard Auditor
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Data directory for the ledger and downloaded shards (overrides config file)
    #[arg(long)]
    datadir: Option<PathBuf>,

    /// File with one node id per line, or `-` for stdin
    #[arg(short, long)]
    nodes_file: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Shard sampling mode: exhaustive or random-offset (overrides config file)
    #[arg(long)]
    sampling: Option<SamplingMode>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Audit all configured nodes (default)
    Run,

    /// Print the ledger entry of one node as JSON
    Show {
        /// Hex node id
        node_id: NodeId,
    },

    /// Export every ledger entry to a JSON file
    Export {
        /// Output file path
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Initialize logging
    init_logging(&args.log_level)?;

    info!("🚀 Starting Shard Auditor v{}", env!("CARGO_PKG_VERSION"));
    info!("──────────────────────────────────────────────");

    // 2. Load configuration
    let mut config = load_configuration(&args.config)?;

    // Command line arguments override config file
    if let Some(datadir) = &args.datadir {
        config.data_dir = datadir.clone();
    }
    if let Some(sampling) = args.sampling {
        config.sampling = sampling;
    }

    // 3. Validate configuration
    validate_configuration(&config)?;

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run_audit(&config, args.nodes_file.as_deref()).await,
        Command::Show { node_id } => show_entry(&config, &node_id).await,
        Command::Export { path } => export_ledger(&config, &path).await,
    }
}

/// Initialize logging system
fn init_logging(log_level: &str) -> Result<()> {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => {
            eprintln!("⚠️  Unknown log level: {}, using INFO", log_level);
            tracing::Level::INFO
        }
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    Ok(())
}

/// Load configuration file, falling back to `SHARD_AUDITOR_*` environment variables
fn load_configuration(config_path: &Path) -> Result<AuditorConfig> {
    info!("📋 Loading configuration: {}", config_path.display());

    if !config_path.exists() {
        warn!("Configuration file does not exist, using defaults and environment");
        return config::load_config_from_env().context("Failed to load configuration from environment");
    }

    config::load_config(config_path).context("Failed to load configuration")
}

/// Validate configuration validity
fn validate_configuration(config: &AuditorConfig) -> Result<()> {
    info!("🔍 Validating configuration...");
    info!("   - Data dir: {}", config.data_dir.display());
    match &config.index_snapshot_path {
        Some(path) => info!("   - Index: snapshot {}", path.display()),
        None => info!("   - Index: {}", config.index_url),
    }
    info!("   - Bridge: {}", config.bridge_rpc_url);
    info!("   - Sampling: {:?}", config.sampling);

    config::validate_config(config).context("Invalid configuration")?;

    info!("✅ Configuration valid");
    Ok(())
}

/// Collect node ids: config first, then the node list file
fn collect_nodes(config: &AuditorConfig, nodes_file: Option<&Path>) -> Result<Vec<NodeId>> {
    let mut nodes = config.node_ids().context("Invalid node id in configuration")?;

    if let Some(path) = nodes_file {
        let text = if path == Path::new("-") {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read node list from stdin")?;
            buf
        } else {
            std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read node list {}", path.display()))?
        };

        let listed = parse_node_list(&text).context("Invalid node list")?;
        info!("📄 Read {} node id(s) from {}", listed.len(), path.display());
        nodes.extend(listed);
    }

    Ok(nodes)
}

/// Execute audit run
async fn run_audit(config: &AuditorConfig, nodes_file: Option<&Path>) -> Result<()> {
    let nodes = collect_nodes(config, nodes_file)?;
    if nodes.is_empty() {
        warn!("No nodes to audit; set `nodes` in the config or pass --nodes-file");
        return Ok(());
    }

    let auditor = Auditor::from_config(config).context("Failed to initialize auditor")?;

    tokio::select! {
        summary = auditor.run(nodes) => {
            summary.log();
            if summary.commit_failures() > 0 {
                warn!(
                    "⚠️  {} node(s) could not be committed and will be audited again on the next run",
                    summary.commit_failures()
                );
            }
            info!("👋 Audit run finished");
        }
        _ = shutdown_signal() => {
            info!("🛑 Received Ctrl+C signal, in-flight audits dropped without commit");
        }
    }

    Ok(())
}

/// Resolves on Ctrl+C; never resolves if the handler cannot be installed
async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        error!("❌ Cannot listen to shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
}

/// Print one ledger entry
async fn show_entry(config: &AuditorConfig, node_id: &NodeId) -> Result<()> {
    let ledger = RedbLedger::open(config.ledger_path()).context("Failed to open ledger")?;

    match ledger.get(node_id).await.context("Failed to read ledger")? {
        Some(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        None => bail!("Node {} has not been audited", node_id),
    }
}

/// Export the whole ledger
async fn export_ledger(config: &AuditorConfig, path: &Path) -> Result<()> {
    let ledger = RedbLedger::open(config.ledger_path()).context("Failed to open ledger")?;

    let count = report::export_ledger_json(&ledger, path)
        .await
        .context("Failed to export ledger")?;

    info!("💾 Exported {} node(s) to {}", count, path.display());
    Ok(())
}
