//! `rexon check` - parse a script without executing it.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use rexon_parser::parse;
use std::path::PathBuf;

#[derive(Args)]
pub struct CheckArgs {
    /// Script file to check
    pub script: PathBuf,
}

pub fn run(args: CheckArgs) -> Result<i32> {
    let source = std::fs::read_to_string(&args.script)
        .with_context(|| format!("cannot read script '{}'", args.script.display()))?;
    match parse(&source) {
        Ok(commands) => {
            println!(
                "{} {} ({} commands)",
                "ok:".green().bold(),
                args.script.display(),
                commands.len()
            );
            Ok(0)
        }
        Err(err) => {
            eprintln!("{} {}", "parse error:".red().bold(), err);
            Ok(1)
        }
    }
}
