//! Control socket: NDJSON request/response envelopes over a Unix socket.

use std::path::{Path, PathBuf};

use ota_control::{Action, StateName};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;

use crate::error::AgentError;
use crate::handle::UpdateManagerHandle;

pub const PROTOCOL_VERSION: u8 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub v: u8,
    pub id: String,
    pub cmd: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl RequestEnvelope {
    pub fn new(cmd: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            v: PROTOCOL_VERSION,
            id: uuid::Uuid::new_v4().to_string(),
            cmd: cmd.into(),
            payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ControlError>,
}

impl ResponseEnvelope {
    /// Split into the result value or the server-reported error.
    pub fn into_result(self) -> Result<serde_json::Value, ControlError> {
        match (self.ok, self.error) {
            (true, _) => Ok(self.result.unwrap_or(serde_json::Value::Null)),
            (false, Some(err)) => Err(err),
            (false, None) => Err(ControlError::new("agent_error", "request failed")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlError {
    pub code: String,
    pub message: String,
}

impl std::fmt::Display for ControlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ControlError {}

impl From<ControlError> for AgentError {
    fn from(err: ControlError) -> Self {
        AgentError::Rejected {
            code: err.code,
            message: err.message,
        }
    }
}

impl ControlError {
    fn new(code: &str, msg: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: msg.into(),
        }
    }

    fn invalid_request(msg: impl Into<String>) -> Self {
        Self::new("invalid_request", msg)
    }

    fn unknown_method(cmd: &str) -> Self {
        Self::new("unknown_method", format!("unknown command '{cmd}'"))
    }

    fn decode(msg: impl Into<String>) -> Self {
        Self::new("decode_error", msg)
    }

    fn agent(err: AgentError) -> Self {
        if err.is_invalid_control_map() {
            Self::new("invalid_control_map", err.to_string())
        } else {
            Self::new("agent_error", err.to_string())
        }
    }
}

/// Control server translating socket requests into update manager calls.
pub struct ControlServer {
    path: PathBuf,
    handle: UpdateManagerHandle,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl ControlServer {
    pub fn new<P: Into<PathBuf>>(
        path: P,
        handle: UpdateManagerHandle,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Self {
        let shutdown_rx = shutdown_tx.subscribe();
        Self {
            path: path.into(),
            handle,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Bind the socket. Split from [`ControlServer::serve`] so bind errors
    /// surface before the server task is spawned.
    pub fn bind(&self) -> Result<UnixListener, AgentError> {
        if self.path.exists() {
            let _ = std::fs::remove_file(&self.path);
        }
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| {
                AgentError::Io(format!("create socket dir {}: {e}", dir.display()))
            })?;
        }
        let listener = UnixListener::bind(&self.path).map_err(|e| {
            AgentError::Io(format!("bind control socket {}: {e}", self.path.display()))
        })?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600));
        }
        tracing::info!(socket = %self.path.display(), "control socket listening");
        Ok(listener)
    }

    pub async fn run(self) -> Result<(), AgentError> {
        let listener = self.bind()?;
        self.serve(listener).await;
        Ok(())
    }

    pub async fn serve(mut self, listener: UnixListener) {
        loop {
            tokio::select! {
                res = listener.accept() => {
                    match res {
                        Ok((stream, _)) => {
                            let handle = self.handle.clone();
                            let shutdown_tx = self.shutdown_tx.clone();
                            tokio::spawn(handle_conn(stream, handle, shutdown_tx));
                        }
                        Err(err) => tracing::warn!(%err, "control socket accept failed"),
                    }
                }
                _ = self.shutdown_rx.recv() => {
                    let _ = std::fs::remove_file(&self.path);
                    break;
                }
            }
        }
        tracing::debug!("control server stopped");
    }
}

async fn handle_conn(
    stream: UnixStream,
    handle: UpdateManagerHandle,
    shutdown_tx: broadcast::Sender<()>,
) {
    let (r, mut w) = stream.into_split();
    let mut reader = BufReader::new(r);
    let mut line = String::new();

    while let Ok(n) = reader.read_line(&mut line).await {
        if n == 0 {
            break;
        }
        if line.trim().is_empty() {
            line.clear();
            continue;
        }
        let resp = match serde_json::from_str::<RequestEnvelope>(&line) {
            Ok(req) => handle_request(req, &handle, &shutdown_tx).await,
            Err(e) => ResponseEnvelope {
                id: String::new(),
                ok: false,
                result: None,
                error: Some(ControlError::decode(e.to_string())),
            },
        };
        if let Ok(json) = serde_json::to_string(&resp) {
            let _ = w.write_all(json.as_bytes()).await;
            let _ = w.write_all(b"\n").await;
        }
        line.clear();
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SetMapPayload {
    update_control_map: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StatePayload {
    state: StateName,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DeploymentPayload {
    deployment_id: String,
}

fn payload<T: DeserializeOwned>(req: &RequestEnvelope) -> Result<T, ControlError> {
    serde_json::from_value(req.payload.clone()).map_err(|e| ControlError::decode(e.to_string()))
}

async fn dispatch(
    req: &RequestEnvelope,
    handle: &UpdateManagerHandle,
    shutdown_tx: &broadcast::Sender<()>,
) -> Result<serde_json::Value, ControlError> {
    if req.v != PROTOCOL_VERSION {
        return Err(ControlError::invalid_request("unsupported protocol version"));
    }
    match req.cmd.as_str() {
        "SetUpdateControlMap" => {
            let p: SetMapPayload = payload(req)?;
            let refresh_timeout = handle
                .set_update_control_map(p.update_control_map)
                .await
                .map_err(ControlError::agent)?;
            Ok(json!({ "refresh_timeout": refresh_timeout }))
        }
        "EffectiveAction" => {
            let p: StatePayload = payload(req)?;
            let res = handle.resolve(p.state);
            Ok(json!({
                "action": res.action,
                "decided_by": res.decided_by,
                "expires_at_ms": res.expires_at_ms,
            }))
        }
        "ActionExecuted" => {
            let p: StatePayload = payload(req)?;
            let report = handle
                .action_executed(p.state)
                .await
                .map_err(ControlError::agent)?;
            Ok(json!({
                "transitioned": report.transitioned,
                "pruned": report.pruned,
            }))
        }
        "DeploymentStarted" => {
            let p: DeploymentPayload = payload(req)?;
            let cleared = handle
                .deployment_started(p.deployment_id)
                .await
                .map_err(ControlError::agent)?;
            Ok(json!({ "cleared": cleared }))
        }
        "DeploymentFinished" => {
            let p: DeploymentPayload = payload(req)?;
            let cleared = handle
                .deployment_finished(p.deployment_id)
                .await
                .map_err(ControlError::agent)?;
            Ok(json!({ "cleared": cleared }))
        }
        "ListControlMaps" => {
            let maps = handle
                .list_control_maps()
                .await
                .map_err(ControlError::agent)?;
            Ok(json!({ "maps": maps }))
        }
        "shutdown" => {
            handle
                .shutdown(shutdown_tx.clone())
                .await
                .map_err(ControlError::agent)?;
            Ok(json!({}))
        }
        other => Err(ControlError::unknown_method(other)),
    }
}

async fn handle_request(
    req: RequestEnvelope,
    handle: &UpdateManagerHandle,
    shutdown_tx: &broadcast::Sender<()>,
) -> ResponseEnvelope {
    match dispatch(&req, handle, shutdown_tx).await {
        Ok(val) => ResponseEnvelope {
            id: req.id,
            ok: true,
            result: Some(val),
            error: None,
        },
        Err(e) => {
            tracing::debug!(cmd = %req.cmd, code = %e.code, "control request failed");
            ResponseEnvelope {
                id: req.id,
                ok: false,
                result: None,
                error: Some(e),
            }
        }
    }
}

/// Control client used by the CLI and tests.
pub struct ControlClient {
    reader: BufReader<tokio::net::unix::OwnedReadHalf>,
    writer: tokio::net::unix::OwnedWriteHalf,
}

impl ControlClient {
    pub async fn connect(path: &Path) -> std::io::Result<Self> {
        let stream = UnixStream::connect(path).await?;
        let (r, w) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(r),
            writer: w,
        })
    }

    pub async fn request(
        &mut self,
        envelope: &RequestEnvelope,
    ) -> std::io::Result<ResponseEnvelope> {
        let json = serde_json::to_string(envelope).map_err(std::io::Error::other)?;
        self.writer.write_all(json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "control socket closed",
            ));
        }
        serde_json::from_str(&line).map_err(std::io::Error::other)
    }

    /// Send `cmd` with `payload` and unwrap the response envelope.
    pub async fn call(
        &mut self,
        cmd: &str,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, AgentError> {
        let resp = self
            .request(&RequestEnvelope::new(cmd, payload))
            .await
            .map_err(|e| AgentError::Io(e.to_string()))?;
        Ok(resp.into_result()?)
    }

    pub async fn set_update_control_map(&mut self, json: &str) -> Result<u64, AgentError> {
        let result = self
            .call("SetUpdateControlMap", json!({ "update_control_map": json }))
            .await?;
        result["refresh_timeout"]
            .as_u64()
            .ok_or_else(|| AgentError::External("response missing refresh_timeout".into()))
    }

    pub async fn effective_action(&mut self, state: StateName) -> Result<Action, AgentError> {
        let result = self.call("EffectiveAction", json!({ "state": state })).await?;
        serde_json::from_value(result["action"].clone())
            .map_err(|e| AgentError::External(format!("bad action in response: {e}")))
    }
}
