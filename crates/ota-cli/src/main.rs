mod commands;
mod opts;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::action::StateArgs;
use commands::deployment::DeploymentArgs;
use commands::map::SetMapArgs;
use commands::run::RunArgs;
use opts::GlobalOpts;

#[derive(Parser, Debug)]
#[command(name = "ota", version, about = "OTA update control CLI")]
struct Cli {
    #[command(flatten)]
    opts: GlobalOpts,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the update manager daemon
    Run(RunArgs),

    /// Submit or refresh a control map
    SetMap(SetMapArgs),

    /// Show the effective action for a checkpoint
    Action(StateArgs),

    /// Report that the driver acted on a checkpoint
    Executed(StateArgs),

    /// Announce the start of a deployment
    DeploymentStarted(DeploymentArgs),

    /// Announce the end of a deployment
    DeploymentFinished(DeploymentArgs),

    /// List live control maps
    List,

    /// Stop a running daemon
    Stop,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let opts = &cli.opts;

    match cli.command {
        Command::Run(args) => commands::run::cmd_run(opts, &args).await,
        Command::SetMap(args) => commands::map::cmd_set_map(opts, &args).await,
        Command::Action(args) => commands::action::cmd_action(opts, &args).await,
        Command::Executed(args) => commands::action::cmd_executed(opts, &args).await,
        Command::DeploymentStarted(args) => commands::deployment::cmd_started(opts, &args).await,
        Command::DeploymentFinished(args) => commands::deployment::cmd_finished(opts, &args).await,
        Command::List => commands::map::cmd_list(opts).await,
        Command::Stop => commands::stop::cmd_stop(opts).await,
    }
}
