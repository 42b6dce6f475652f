//! thinshare agent
//!
//! Watches volume attachment records and drives blob holders, NBD exports
//! and pool activation until each volume is attached where it is wanted.
//!
//! Run exactly one agent per cluster. Its redb store stands in for the
//! replicated cluster API: every record of every node lives in that one
//! file, and other nodes are reached through `scripts.remote_shell`. The
//! store takes an exclusive file lock, so a second agent on the same
//! store fails to start. `node.name` names the host the agent runs on.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thinshare_blobs::{
    BlobManager, LvmScript, MultipathScript, NbdScript, NodeCommand, ShellCommand,
    VolumeReconciler,
};
use thinshare_common::{Config, NodeName};
use thinshare_state::{RedbBackend, StateStore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "thinshare-agent")]
#[command(about = "thinshare cluster attachment agent")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/thinshare/agent.toml")]
    config: PathBuf,

    /// Name of the node hosting the agent (defaults to node.name from the config file)
    #[arg(long, env = "THINSHARE_NODE_NAME")]
    node_name: Option<String>,

    /// State database path
    #[arg(long)]
    state_path: Option<PathBuf>,

    /// Log level (RUST_LOG takes precedence)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Run a single reconcile pass and exit
    #[arg(long)]
    once: bool,
}

/// Load the config file if present, then apply CLI overrides
fn load_config(args: &Args) -> Result<Config> {
    let mut config = read_config_file(&args.config)?;

    if let Some(name) = &args.node_name {
        config.node.name.clone_from(name);
    }
    if let Some(path) = &args.state_path {
        config.store.path.clone_from(path);
    }

    Ok(config)
}

fn read_config_file(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("failed to parse config file {}", path.display()))
}

fn build_manager(config: &Config, local_node: &NodeName) -> Result<BlobManager> {
    let backend = RedbBackend::open(&config.store.path).with_context(|| {
        format!("failed to open state store {}", config.store.path.display())
    })?;
    let store = StateStore::new(Arc::new(backend), &config.store);

    let runner: Arc<dyn NodeCommand> = Arc::new(
        ShellCommand::new(local_node.clone(), config.scripts.remote_shell.clone())
            .context("invalid scripts.remote_shell")?,
    );
    let vg = &config.lvm.vg_name;

    Ok(BlobManager::new(
        store,
        Arc::new(LvmScript::new(runner.clone(), config.scripts.lvm.clone(), vg)),
        Arc::new(NbdScript::new(runner.clone(), config.scripts.nbd.clone())),
        Arc::new(MultipathScript::new(runner, config.scripts.multipath.clone(), vg)),
        vg,
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = load_config(&args)?;
    let local_node = NodeName::new(config.node.name.clone()).context("invalid node name")?;

    info!("Starting thinshare agent on {}", local_node);
    info!("Config file: {}", args.config.display());
    info!("State store: {}", config.store.path.display());
    info!("Volume group: {}", config.lvm.vg_name);

    let manager = Arc::new(build_manager(&config, &local_node)?);
    let reconciler = VolumeReconciler::new(manager);

    let shutdown = CancellationToken::new();
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
        }
        info!("Shutting down...");
        ctrl_c.cancel();
    });

    if args.once {
        let failed = reconciler.reconcile_all(&shutdown).await?;
        if failed > 0 {
            error!("{} volume(s) failed to reconcile", failed);
            std::process::exit(1);
        }
        return Ok(());
    }

    reconciler
        .run(config.reconcile.interval(), shutdown)
        .await;

    info!("Agent shut down gracefully");
    Ok(())
}
