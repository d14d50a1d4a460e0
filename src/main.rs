mod agents;
mod cli;
mod config;
mod error;
mod gitlab;
mod logging;
mod manifest;
mod provider;
mod registry;
mod workflow;

use clap::Parser;
use cli::{Cli, Commands};
use colored::Colorize;
use config::Config;
use std::process;

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("{} {}", "Error:".red().bold(), message);
    process::exit(1);
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = logging::init(cli.verbose) {
        fail(e);
    }

    let config = Config::load(cli.config.as_deref()).unwrap_or_else(|e| fail(e));

    let result = match cli.command {
        Commands::Run { dry_run } => match workflow::execute_run(&config, dry_run) {
            Ok(summary) if summary.has_failures() => {
                fail("one or more providers could not be reconciled")
            }
            Ok(_) => Ok(()),
            Err(e) => Err(e),
        },
        Commands::Check => workflow::execute_check(&config),
        Commands::List => workflow::execute_list(&config),
    };

    if let Err(e) = result {
        fail(e);
    }
}
