//! `ota set-map` and `ota list`.

use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use serde_json::json;

use crate::opts::GlobalOpts;
use crate::output::print_success;

use super::call;

#[derive(Args, Debug)]
pub struct SetMapArgs {
    /// Control map JSON file, or `-` for stdin
    pub file: PathBuf,
}

pub async fn cmd_set_map(opts: &GlobalOpts, args: &SetMapArgs) -> Result<()> {
    let json = if args.file.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("read control map from stdin")?;
        buf
    } else {
        std::fs::read_to_string(&args.file)
            .with_context(|| format!("read control map {}", args.file.display()))?
    };

    let result = call(
        opts,
        "SetUpdateControlMap",
        json!({ "update_control_map": json }),
    )
    .await?;
    print_success(opts, result)
}

pub async fn cmd_list(opts: &GlobalOpts) -> Result<()> {
    let result = call(opts, "ListControlMaps", json!({})).await?;
    print_success(opts, result["maps"].clone())
}
