//! `rexon run` - execute a script.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use rexon_core::Value;
use rexon_interp::{Interpreter, RunResult};
use rexon_parser::parse;
use std::path::PathBuf;

#[derive(Args)]
pub struct RunArgs {
    /// Script file to execute
    pub script: PathBuf,

    /// Arguments passed to the script's PARSE ARG
    pub args: Vec<String>,

    /// Emit a `>> <line> <source>` trace of executed statements
    #[arg(long)]
    pub trace: bool,

    /// Security policy for REQUIRE: strict, moderate, default, or permissive
    #[arg(long)]
    pub policy: Option<String>,
}

pub async fn run(args: RunArgs) -> Result<i32> {
    let source = std::fs::read_to_string(&args.script)
        .with_context(|| format!("cannot read script '{}'", args.script.display()))?;
    let commands = parse(&source)?;

    let mut interp = Interpreter::new();
    if let Some(policy) = &args.policy {
        interp
            .set_security_policy(policy)
            .with_context(|| format!("invalid --policy '{}'", policy))?;
    }
    interp.set_trace(args.trace);
    interp.set_script_arguments(
        args.args
            .iter()
            .map(|a| Value::String(a.clone()))
            .collect(),
    );

    let outcome = interp
        .run(commands, Some(&source), Some(&args.script))
        .await;

    if args.trace {
        for line in interp.trace_lines() {
            eprintln!("{}", line.dimmed());
        }
    }

    match outcome? {
        RunResult::Exit(code) => Ok(code as i32),
        RunResult::Return(value) => {
            if !matches!(value, Value::Undefined) {
                println!("{}", value.to_display_string());
            }
            Ok(0)
        }
        RunResult::Normal => Ok(0),
    }
}
