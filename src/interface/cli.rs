//! # Command Line
//!
//! `relay [--config PATH] [--mode MODE] [COMMAND]`

use crate::domain::types::Mode;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "relay", version, about = "Relays text messages from a source room to destination rooms")]
pub struct Cli {
    /// Static settings (credentials, logging, store location).
    #[arg(long, default_value = "data/config.yaml")]
    pub config: PathBuf,

    /// Override the stored forwarding mode for this process.
    #[arg(long, env = "RELAY_MODE", value_parser = parse_mode)]
    pub mode: Option<Mode>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Connect and forward until interrupted (the default).
    Run {
        /// Run a single incremental cycle and exit.
        #[arg(long)]
        once: bool,
    },
    /// Print the current forwarding configuration.
    Status,
    /// Validate the configuration and print upcoming trigger times.
    Check,
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Run { once: false })
    }
}

fn parse_mode(value: &str) -> Result<Mode, String> {
    value.parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_run() {
        let cli = Cli::try_parse_from(["relay"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("data/config.yaml"));
        assert!(matches!(cli.command(), Command::Run { once: false }));
    }

    #[test]
    fn test_mode_aliases() {
        let cli = Cli::try_parse_from(["relay", "--mode", "today", "run", "--once"]).unwrap();
        assert_eq!(cli.mode, Some(Mode::Continuous));
        assert!(matches!(cli.command(), Command::Run { once: true }));

        assert!(Cli::try_parse_from(["relay", "--mode", "sometimes"]).is_err());
    }

    #[test]
    fn test_subcommands() {
        let cli = Cli::try_parse_from(["relay", "--config", "/etc/relay.yaml", "check"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("/etc/relay.yaml"));
        assert!(matches!(cli.command(), Command::Check));
    }
}
