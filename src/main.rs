use clap::{Parser, Subcommand};
use dunning_engine::error::AppError;

use crate::demo::{run_demo, run_scan, DemoArgs, ScanArgs};

mod demo;
mod infra;

#[derive(Parser, Debug)]
#[command(
    name = "Collections Orchestrator",
    about = "Run the dunning collections engine against a demo receivables book",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one batch escalation pass (default command)
    Scan(ScanArgs),
    /// Walk a plan through pause, resume, payment retry, and policy switch
    Demo(DemoArgs),
}

fn main() {
    if let Err(err) = run_cli() {
        eprintln!("application error: {err}");
        std::process::exit(1);
    }
}

fn run_cli() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or_else(|| Command::Scan(ScanArgs::default()));

    match command {
        Command::Scan(args) => run_scan(args),
        Command::Demo(args) => run_demo(args),
    }
}
