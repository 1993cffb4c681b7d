//! CLI command handlers.

pub mod action;
pub mod deployment;
pub mod map;
pub mod run;
pub mod stop;

use anyhow::{Result, anyhow};
use ota_agent::ControlClient;
use serde_json::Value;

use crate::opts::GlobalOpts;

/// Connect to the running update manager.
pub async fn control_client(opts: &GlobalOpts) -> Result<ControlClient> {
    ControlClient::connect(&opts.socket).await.map_err(|e| {
        anyhow!(
            "no update manager listening on {}: {e}",
            opts.socket.display()
        )
    })
}

/// Send one command and return its result payload.
pub async fn call(opts: &GlobalOpts, cmd: &str, payload: Value) -> Result<Value> {
    let mut client = control_client(opts).await?;
    Ok(client.call(cmd, payload).await?)
}
