#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use ota_agent::{AgentError, ControlMsg, UpdateManagerDaemon, UpdateManagerHandle};
use ota_control::ControlMapService;
use ota_store::MemStore;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

pub const PAUSE_INSTALL: &str =
    r#"{"id":"dep","priority":0,"states":{"ArtifactInstall_Enter":{"action":"pause"}}}"#;

pub struct Running {
    pub handle: UpdateManagerHandle,
    pub control_tx: mpsc::Sender<ControlMsg>,
    pub shutdown_tx: broadcast::Sender<()>,
    pub task: JoinHandle<Result<(), AgentError>>,
}

/// Start a daemon over `store` on the current runtime.
pub fn start(store: Arc<MemStore>, expiration: Duration) -> Running {
    let service = ControlMapService::open(store, expiration).expect("open service");
    let (control_tx, control_rx) = mpsc::channel(16);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let mut daemon = UpdateManagerDaemon::new(
        service,
        Duration::from_secs(60),
        control_rx,
        shutdown_rx,
        None,
    );
    let handle = daemon.handle(control_tx.clone());
    let task = tokio::spawn(async move { daemon.run().await });
    Running {
        handle,
        control_tx,
        shutdown_tx,
        task,
    }
}

pub async fn stop(running: Running) {
    running
        .handle
        .shutdown(running.shutdown_tx.clone())
        .await
        .expect("shutdown");
    running.task.await.expect("join").expect("daemon result");
}
