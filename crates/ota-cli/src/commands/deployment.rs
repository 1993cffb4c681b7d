//! `ota deployment-started` and `ota deployment-finished`.

use anyhow::Result;
use clap::Args;
use serde_json::json;

use crate::opts::GlobalOpts;
use crate::output::print_success;

use super::call;

#[derive(Args, Debug)]
pub struct DeploymentArgs {
    /// Deployment id
    pub id: String,
}

pub async fn cmd_started(opts: &GlobalOpts, args: &DeploymentArgs) -> Result<()> {
    let result = call(opts, "DeploymentStarted", json!({ "deployment_id": args.id })).await?;
    print_success(opts, result)
}

pub async fn cmd_finished(opts: &GlobalOpts, args: &DeploymentArgs) -> Result<()> {
    let result = call(opts, "DeploymentFinished", json!({ "deployment_id": args.id })).await?;
    print_success(opts, result)
}
