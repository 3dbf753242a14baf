use crate::demo::{run_demo, run_transitions, DemoArgs, TransitionsArgs};
use clap::{Parser, Subcommand};
use licensing::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "Licensing Review Workflow",
    about = "Inspect and demonstrate the licensing request review workflow from the command line",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Walk one request from draft to a final decision and print its audit trail (default command)
    Demo(DemoArgs),
    /// Print the transition table, optionally for a single state
    Transitions(TransitionsArgs),
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Demo(DemoArgs::default()));

    match command {
        Command::Demo(args) => run_demo(args).await,
        Command::Transitions(args) => run_transitions(args),
    }
}
