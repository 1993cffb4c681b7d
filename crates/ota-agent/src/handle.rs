use std::sync::Arc;

use ota_control::{
    Action, ActionExecutedReport, ControlMapEntry, ControlMapRegistry, MapKey, Resolution,
    StateName,
};
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::daemon::{ControlMapEvent, ControlMsg};
use crate::error::AgentError;

/// Cloneable access to a running [`crate::UpdateManagerDaemon`].
///
/// Queries read the shared registry directly and never wait on the daemon.
/// Mutations are sent to the daemon, which applies them one at a time.
#[derive(Debug, Clone)]
pub struct UpdateManagerHandle {
    control_tx: mpsc::Sender<ControlMsg>,
    registry: Arc<ControlMapRegistry>,
    events: broadcast::Sender<ControlMapEvent>,
}

impl UpdateManagerHandle {
    pub(crate) fn new(
        control_tx: mpsc::Sender<ControlMsg>,
        registry: Arc<ControlMapRegistry>,
        events: broadcast::Sender<ControlMapEvent>,
    ) -> Self {
        Self {
            control_tx,
            registry,
            events,
        }
    }

    /// Action the install driver must take on entering `state`.
    pub fn effective_action(&self, state: StateName) -> Action {
        self.registry.effective_action(state)
    }

    pub fn resolve(&self, state: StateName) -> Resolution {
        self.registry.resolve(state)
    }

    /// Notifications sent after every change to the set of maps.
    pub fn subscribe(&self) -> broadcast::Receiver<ControlMapEvent> {
        self.events.subscribe()
    }

    /// Submit a control map as JSON. Returns the refresh timeout in seconds.
    pub async fn set_update_control_map(&self, json: impl Into<String>) -> Result<u64, AgentError> {
        let json = json.into();
        self.request(|resp| ControlMsg::SetUpdateControlMap { json, resp })
            .await
    }

    pub async fn action_executed(
        &self,
        state: StateName,
    ) -> Result<ActionExecutedReport, AgentError> {
        self.request(|resp| ControlMsg::ActionExecuted { state, resp })
            .await
    }

    pub async fn deployment_started(
        &self,
        deployment_id: impl Into<String>,
    ) -> Result<Vec<MapKey>, AgentError> {
        let deployment_id = deployment_id.into();
        self.request(|resp| ControlMsg::DeploymentStarted {
            deployment_id,
            resp,
        })
        .await
    }

    pub async fn deployment_finished(
        &self,
        deployment_id: impl Into<String>,
    ) -> Result<Vec<MapKey>, AgentError> {
        let deployment_id = deployment_id.into();
        self.request(|resp| ControlMsg::DeploymentFinished {
            deployment_id,
            resp,
        })
        .await
    }

    /// Resolution computed by the daemon itself, ordered after every
    /// mutation sent before it.
    pub async fn effective_action_synced(
        &self,
        state: StateName,
    ) -> Result<Resolution, AgentError> {
        self.request(|resp| ControlMsg::EffectiveAction { state, resp })
            .await
    }

    pub async fn list_control_maps(&self) -> Result<Vec<ControlMapEntry>, AgentError> {
        self.request(|resp| ControlMsg::ListControlMaps { resp }).await
    }

    /// Ask the daemon to stop and broadcast `()` on `shutdown_tx`.
    pub async fn shutdown(&self, shutdown_tx: broadcast::Sender<()>) -> Result<(), AgentError> {
        self.request(|resp| ControlMsg::Shutdown { resp, shutdown_tx })
            .await
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, AgentError>>) -> ControlMsg,
    ) -> Result<T, AgentError> {
        let (tx, rx) = oneshot::channel();
        self.control_tx
            .send(build(tx))
            .await
            .map_err(|_| AgentError::External("update manager is not running".into()))?;
        rx.await
            .map_err(|e| AgentError::External(e.to_string()))?
    }
}
