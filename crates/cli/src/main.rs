//! rexon CLI entry point.

use clap::Parser;
use colored::Colorize;

mod commands;

#[derive(Parser)]
#[command(name = "rexon")]
#[command(about = "A REXX-dialect scripting language interpreter", long_about = None)]
struct Cli {
    /// Enable verbose internal logging
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<commands::Commands>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    match cli.command {
        Some(cmd) => match commands::run(cmd).await {
            Ok(code) => std::process::exit(code),
            Err(e) => {
                eprintln!("{} {}", "Error:".red().bold(), e);
                std::process::exit(1);
            }
        },
        None => {
            println!("rexon - a REXX-dialect scripting language interpreter");
            println!("Run 'rexon --help' for usage information.");
        }
    }
}
