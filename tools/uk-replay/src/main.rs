//! uk-replay - Run request scripts against an in-process object server
//!
//! # Purpose
//! Exercises the server without a wire protocol:
//! - Declare processes and threads by name
//! - Issue typed requests step by step and print each status and reply
//! - Check expected statuses
//! - Dump the object namespace afterwards
//!
//! # Usage
//! ```text
//! uk-replay scripts/completion.toml --config server.toml --dump
//! ```

mod script;

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use colored::Colorize;
use uk_kobject::ServerConfig;
use uk_server::{Reply, Server};

use crate::script::{Outcome, Script};

#[derive(Parser)]
#[command(name = "uk-replay")]
#[command(version)]
#[command(about = "Replay request scripts against an in-process object server", long_about = None)]
struct Cli {
    /// Request script (TOML)
    script: PathBuf,

    /// Server configuration (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the object namespace after the last step
    #[arg(long)]
    dump: bool,

    /// Show reply data for every step
    #[arg(short, long)]
    verbose: bool,
}

fn print_outcome(outcome: &Outcome, verbose: bool) {
    let status = format!("{:?}", outcome.status);
    let status = if !outcome.as_expected() {
        status.red().bold()
    } else if outcome.status.is_success() {
        status.green()
    } else {
        status.yellow()
    };

    print!("[{:>3}] {:<10} {:<20} -> {}", outcome.index, outcome.thread, outcome.action, status);
    if let Some(expected) = outcome.expected.filter(|_| !outcome.as_expected()) {
        print!(" (expected {:?})", expected);
    }
    println!();

    if verbose && outcome.reply != Reply::None {
        println!("      {:?}", outcome.reply);
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ServerConfig::load(path).with_context(|| format!("Failed to load {}", path.display()))?,
        None => ServerConfig::default(),
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(config.log.filter.as_str())).init();

    let text = std::fs::read_to_string(&cli.script)
        .with_context(|| format!("Failed to read {}", cli.script.display()))?;
    let script = Script::parse(&text)?;
    log::info!(
        "{}: {} processes, {} threads, {} steps",
        cli.script.display(),
        script.processes.len(),
        script.threads.len(),
        script.steps.len()
    );

    let server = Server::new(config).context("Failed to start server")?;
    let outcomes = script.run(&server)?;
    for outcome in &outcomes {
        print_outcome(outcome, cli.verbose);
    }

    if cli.dump {
        println!("\n{}", "Namespace".bold());
        for line in server.namespace().dump() {
            println!("  {}", line);
        }
    }

    let failed = outcomes.iter().filter(|o| !o.as_expected()).count();
    if failed > 0 {
        bail!("{} of {} steps did not produce the expected status", failed, outcomes.len());
    }
    println!("\n{} {} steps", "✓".green(), outcomes.len());
    Ok(())
}
