//! Global CLI options.

use std::path::PathBuf;

use clap::Args;
use ota_agent::config::DEFAULT_CONTROL_SOCKET;

/// Options shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct GlobalOpts {
    /// Control socket of the update manager (env: OTA_CONTROL_SOCKET)
    #[arg(long, global = true, env = "OTA_CONTROL_SOCKET", default_value = DEFAULT_CONTROL_SOCKET)]
    pub socket: PathBuf,

    /// JSON output
    #[arg(long, global = true)]
    pub json: bool,

    /// Pretty-print JSON output (implies --json)
    #[arg(long, global = true)]
    pub pretty: bool,
}
