//! `ota action` and `ota executed`.

use anyhow::Result;
use clap::Args;
use ota_control::StateName;
use serde_json::json;

use crate::opts::GlobalOpts;
use crate::output::print_success;

use super::{call, control_client};

#[derive(Args, Debug)]
pub struct StateArgs {
    /// Checkpoint, e.g. ArtifactInstall_Enter
    pub state: StateName,
}

/// Human output is the bare action; `--json` adds the deciding map.
pub async fn cmd_action(opts: &GlobalOpts, args: &StateArgs) -> Result<()> {
    if opts.json || opts.pretty {
        let result = call(opts, "EffectiveAction", json!({ "state": args.state })).await?;
        return print_success(opts, result);
    }
    let mut client = control_client(opts).await?;
    let action = client.effective_action(args.state).await?;
    print_success(opts, json!(action))
}

pub async fn cmd_executed(opts: &GlobalOpts, args: &StateArgs) -> Result<()> {
    let result = call(opts, "ActionExecuted", json!({ "state": args.state })).await?;
    print_success(opts, result)
}
