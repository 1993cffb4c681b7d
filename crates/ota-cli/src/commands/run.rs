//! `ota run`: the update manager daemon with its control socket.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use ota_agent::config::interval_secs;
use ota_agent::{AgentConfig, ControlServer, UpdateManagerDaemon};
use ota_control::ControlMapService;
use ota_store::{MemStore, SqliteStore, Store};
use tokio::sync::{broadcast, mpsc};
use tracing_subscriber::EnvFilter;

use crate::opts::GlobalOpts;

/// Flags override the `OTA_*` environment read by [`AgentConfig::from_env`].
#[derive(Args, Debug)]
pub struct RunArgs {
    /// SQLite database for control maps; in-memory when omitted (env: OTA_STORE_PATH)
    #[arg(long)]
    pub store: Option<PathBuf>,

    /// Lifetime of a submitted control map (env: OTA_MAP_EXPIRATION_SECS)
    #[arg(long)]
    pub map_expiration_secs: Option<u64>,

    /// Wake interval when no deadline is pending (env: OTA_IDLE_TICK_SECS)
    #[arg(long)]
    pub idle_tick_secs: Option<u64>,
}

impl RunArgs {
    fn config(&self, opts: &GlobalOpts) -> Result<AgentConfig> {
        let mut config = AgentConfig::from_env()?;
        if let Some(secs) = self.map_expiration_secs {
            config.map_expiration = interval_secs("--map-expiration-secs", secs)?;
        }
        if let Some(secs) = self.idle_tick_secs {
            config.idle_tick = interval_secs("--idle-tick-secs", secs)?;
        }
        if let Some(path) = &self.store {
            config.store_path = Some(path.clone());
        }
        config.control_socket = opts.socket.clone();
        Ok(config)
    }
}

pub async fn cmd_run(opts: &GlobalOpts, args: &RunArgs) -> Result<()> {
    setup_logging();
    let config = args.config(opts)?;

    match &config.store_path {
        Some(path) => {
            let store = SqliteStore::open(path)
                .with_context(|| format!("open store {}", path.display()))?;
            run_daemon(&config, Arc::new(store)).await
        }
        None => {
            tracing::warn!("no store configured; control maps will not survive a restart");
            run_daemon(&config, Arc::new(MemStore::new())).await
        }
    }
}

async fn run_daemon<S: Store + 'static>(config: &AgentConfig, store: Arc<S>) -> Result<()> {
    let service =
        ControlMapService::open(store, config.map_expiration).context("restore control maps")?;

    let (control_tx, control_rx) = mpsc::channel(128);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    // Handle Ctrl-C and SIGTERM for graceful shutdown
    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        let mut term =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl-C received, shutting down");
            }
            _ = async {
                if let Some(ref mut t) = term { t.recv().await; }
            } => {
                tracing::info!("SIGTERM received, shutting down");
            }
        }
        let _ = shutdown_tx_clone.send(());
    });

    let mut daemon =
        UpdateManagerDaemon::new(service, config.idle_tick, control_rx, shutdown_rx, None);

    let server = ControlServer::new(
        config.control_socket.clone(),
        daemon.handle(control_tx),
        shutdown_tx.clone(),
    );
    let listener = server.bind()?;
    daemon.set_control_server(tokio::spawn(server.serve(listener)));

    daemon.run().await?;
    Ok(())
}

/// Set up tracing subscriber for daemon logging. `RUST_LOG` overrides the
/// default `info` level.
fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .init();
}
