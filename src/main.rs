use anyhow::Result;
use clap::Parser;

mod channel;
mod cli;
mod commands;
mod config;
mod host;
mod lockdown;
mod navigation;
mod platform;
#[cfg(feature = "ui")]
mod ui;
mod whitelist;

use cli::{Args, Commands, ConfigCommands};

fn main() {
    match run() {
        Ok(true) => {}
        Ok(false) => std::process::exit(2),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Returns `Ok(false)` when a check completed but failed
fn run() -> Result<bool> {
    let args = Args::parse();
    commands::utils::init_logging(args.verbose);

    match args.command {
        Commands::Run {
            duration_ms,
            ui,
            lock_file,
        } => commands::run(commands::RunArgs {
            config: args.config,
            duration_ms,
            ui,
            lock_file,
        })
        .map(|()| true),
        Commands::CheckUrl { urls } => commands::check_urls(args.config.as_deref(), &urls),
        Commands::Config { command } => match command {
            ConfigCommands::Init { output, force } => {
                commands::config::init(output, force).map(|()| true)
            }
            ConfigCommands::Show => commands::config::show(args.config.as_deref()).map(|()| true),
        },
    }
}
