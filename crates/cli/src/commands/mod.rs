//! CLI commands module.

use anyhow::Result;
use clap::Subcommand;

mod check;
mod run;

#[derive(Subcommand)]
pub enum Commands {
    /// Run a script
    Run(run::RunArgs),
    /// Parse a script and report problems without executing it
    Check(check::CheckArgs),
}

/// Dispatch a command; the returned code becomes the process exit code.
pub async fn run(cmd: Commands) -> Result<i32> {
    match cmd {
        Commands::Run(args) => run::run(args).await,
        Commands::Check(args) => check::run(args),
    }
}
