//! Daemon mode: the long-lived owner of the control map service.
//!
//! The daemon runs a select loop that:
//! 1. Expires maps whose refresh deadline passed
//! 2. Processes control messages
//! 3. Handles graceful shutdown
//!
//! Only the daemon mutates maps. Readers go straight to the shared registry
//! through an [`UpdateManagerHandle`].

use std::time::Duration;

use ota_control::{
    ActionExecutedReport, ControlMapEntry, ControlMapService, MapKey, Resolution, StateName,
    now_wallclock_ms,
};
use ota_store::Store;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::AgentError;
use crate::handle::UpdateManagerHandle;

const EVENT_CAPACITY: usize = 16;

/// Convert a wall-clock deadline (Unix milliseconds) to a `tokio::time::Instant`.
///
/// Past deadlines map to "now" so the sleep fires immediately.
fn deadline_instant(deadline_ms: u64, now_ms: u64) -> tokio::time::Instant {
    let now = tokio::time::Instant::now();
    if deadline_ms <= now_ms {
        now
    } else {
        now + Duration::from_millis(deadline_ms - now_ms)
    }
}

/// Control message for the daemon.
#[derive(Debug)]
pub enum ControlMsg {
    SetUpdateControlMap {
        json: String,
        resp: oneshot::Sender<Result<u64, AgentError>>,
    },
    EffectiveAction {
        state: StateName,
        resp: oneshot::Sender<Result<Resolution, AgentError>>,
    },
    ActionExecuted {
        state: StateName,
        resp: oneshot::Sender<Result<ActionExecutedReport, AgentError>>,
    },
    DeploymentStarted {
        deployment_id: String,
        resp: oneshot::Sender<Result<Vec<MapKey>, AgentError>>,
    },
    DeploymentFinished {
        deployment_id: String,
        resp: oneshot::Sender<Result<Vec<MapKey>, AgentError>>,
    },
    ListControlMaps {
        resp: oneshot::Sender<Result<Vec<ControlMapEntry>, AgentError>>,
    },
    Shutdown {
        resp: oneshot::Sender<Result<(), AgentError>>,
        /// Propagates shutdown to the control server.
        shutdown_tx: broadcast::Sender<()>,
    },
}

/// Published whenever the set of maps changes, so a paused driver can re-poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMapEvent {
    Updated,
}

pub struct UpdateManagerDaemon<S: Store + 'static> {
    service: ControlMapService<S>,
    idle_tick: Duration,
    control_rx: mpsc::Receiver<ControlMsg>,
    shutdown_rx: broadcast::Receiver<()>,
    events_tx: broadcast::Sender<ControlMapEvent>,
    control_server: Option<JoinHandle<()>>,
}

impl<S: Store + 'static> UpdateManagerDaemon<S> {
    pub fn new(
        service: ControlMapService<S>,
        idle_tick: Duration,
        control_rx: mpsc::Receiver<ControlMsg>,
        shutdown_rx: broadcast::Receiver<()>,
        control_server: Option<JoinHandle<()>>,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            service,
            idle_tick,
            control_rx,
            shutdown_rx,
            events_tx,
            control_server,
        }
    }

    /// Handle for the install driver, sending requests over `control_tx`.
    pub fn handle(&self, control_tx: mpsc::Sender<ControlMsg>) -> UpdateManagerHandle {
        UpdateManagerHandle::new(
            control_tx,
            self.service.registry().clone(),
            self.events_tx.clone(),
        )
    }

    /// Attach the control server task so shutdown waits for it.
    pub fn set_control_server(&mut self, server: JoinHandle<()>) {
        self.control_server = Some(server);
    }

    /// Run until a shutdown message or signal arrives.
    ///
    /// A store failure while expiring maps ends the loop with that error;
    /// failures inside a control message are returned to its requester.
    pub async fn run(&mut self) -> Result<(), AgentError> {
        tracing::info!(
            maps = self.service.registry().len(),
            expiration_secs = self.service.expiration().as_secs(),
            "update manager started"
        );

        // Maps restored from the store may already be past their deadline.
        self.tick()?;

        let mut control_open = true;

        loop {
            let now_ms = now_wallclock_ms();
            let idle = tokio::time::Instant::now() + self.idle_tick;
            // The idle tick bounds every sleep so wall-clock jumps are caught.
            let wake = match self.service.next_deadline_ms() {
                Some(deadline) => deadline_instant(deadline, now_ms).min(idle),
                None => idle,
            };

            tokio::select! {
                _ = tokio::time::sleep_until(wake) => {
                    self.tick()?;
                }

                msg = self.control_rx.recv(), if control_open => {
                    match msg {
                        Some(cmd) => {
                            let should_stop = matches!(cmd, ControlMsg::Shutdown { .. });
                            self.apply_control(cmd);
                            if should_stop {
                                tracing::info!("shutdown requested via control channel");
                                break;
                            }
                        }
                        None => {
                            tracing::debug!("control channel closed");
                            control_open = false;
                        }
                    }
                }

                _ = self.shutdown_rx.recv() => {
                    tracing::info!("shutdown signal received");
                    break;
                }
            }
        }

        tracing::info!("update manager stopped");
        if let Some(handle) = self.control_server.take() {
            let _ = handle.await;
        }
        Ok(())
    }

    fn tick(&mut self) -> Result<(), AgentError> {
        let report = self.service.expire_due(now_wallclock_ms())?;
        if !report.is_empty() {
            tracing::debug!(
                expired = report.expired.len(),
                pruned = report.pruned.len(),
                "expiry tick"
            );
            self.notify();
        }
        Ok(())
    }

    fn notify(&self) {
        // No subscribers is fine.
        let _ = self.events_tx.send(ControlMapEvent::Updated);
    }

    fn apply_control(&mut self, msg: ControlMsg) {
        match msg {
            ControlMsg::SetUpdateControlMap { json, resp } => {
                let res = self
                    .service
                    .set_control_map_json(&json, now_wallclock_ms())
                    .map_err(AgentError::from);
                match &res {
                    Ok(_) => self.notify(),
                    Err(err) => tracing::warn!(%err, "rejected control map"),
                }
                let _ = resp.send(res);
            }
            ControlMsg::EffectiveAction { state, resp } => {
                let _ = resp.send(Ok(self.service.registry().resolve(state)));
            }
            ControlMsg::ActionExecuted { state, resp } => {
                let res = self.service.action_executed(state).map_err(AgentError::from);
                if matches!(&res, Ok(report) if !report.is_empty()) {
                    self.notify();
                }
                let _ = resp.send(res);
            }
            ControlMsg::DeploymentStarted {
                deployment_id,
                resp,
            } => {
                let res = self
                    .service
                    .deployment_started(&deployment_id)
                    .map_err(AgentError::from);
                self.notify_if_removed(&res);
                let _ = resp.send(res);
            }
            ControlMsg::DeploymentFinished {
                deployment_id,
                resp,
            } => {
                let res = self
                    .service
                    .deployment_finished(&deployment_id)
                    .map_err(AgentError::from);
                self.notify_if_removed(&res);
                let _ = resp.send(res);
            }
            ControlMsg::ListControlMaps { resp } => {
                let _ = resp.send(Ok(self.service.registry().get_all()));
            }
            ControlMsg::Shutdown { resp, shutdown_tx } => {
                let _ = shutdown_tx.send(());
                let _ = resp.send(Ok(()));
            }
        }
    }

    fn notify_if_removed(&self, res: &Result<Vec<MapKey>, AgentError>) {
        if matches!(res, Ok(removed) if !removed.is_empty()) {
            self.notify();
        }
    }
}
