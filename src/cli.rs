use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Kiosk Lockdown Browser
///
/// Confines a single fullscreen browsing surface to a whitelist of
/// destinations for a fixed-length session.
#[derive(Parser, Debug)]
#[command(name = "lockdown-browser")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file (defaults to the platform location)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a lockdown session
    Run {
        /// Override the configured session length
        #[arg(long)]
        duration_ms: Option<u64>,

        /// Open the built-in webview window instead of the stdio bridge
        #[arg(long)]
        ui: bool,

        /// Lock file preventing a second controller (defaults to the runtime directory)
        #[arg(long)]
        lock_file: Option<PathBuf>,
    },
    /// Check URLs against the configured whitelist
    CheckUrl {
        /// URLs to check
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Manage the kiosk configuration file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Write an example configuration file
    Init {
        /// Output path (defaults to the platform location)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
    /// Print the effective configuration
    Show,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_with_overrides() {
        let args = Args::parse_from([
            "lockdown-browser",
            "--verbose",
            "run",
            "--duration-ms",
            "2000",
        ]);
        assert!(args.verbose);
        match args.command {
            Commands::Run { duration_ms, ui, .. } => {
                assert_eq!(duration_ms, Some(2000));
                assert!(!ui);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn check_url_requires_at_least_one_url() {
        assert!(Args::try_parse_from(["lockdown-browser", "check-url"]).is_err());
    }

    #[test]
    fn global_config_after_subcommand() {
        let args = Args::parse_from(["lockdown-browser", "config", "show", "-c", "/tmp/k.yaml"]);
        assert_eq!(args.config, Some(PathBuf::from("/tmp/k.yaml")));
    }
}
