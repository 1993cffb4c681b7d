//! `ota stop` command.

use anyhow::Result;
use ota_agent::{AgentError, RequestEnvelope};
use serde_json::json;

use crate::opts::GlobalOpts;
use crate::output::print_success;

use super::control_client;

pub async fn cmd_stop(opts: &GlobalOpts) -> Result<()> {
    let mut client = control_client(opts).await?;
    match client.request(&RequestEnvelope::new("shutdown", json!({}))).await {
        Ok(resp) => {
            resp.into_result().map_err(AgentError::from)?;
        }
        // The daemon may exit before the reply is flushed.
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {}
        Err(err) => return Err(err.into()),
    }
    print_success(opts, json!({ "stopped": true }))
}
