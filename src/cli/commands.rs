//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - run: start the runtime and drive a few hosts
//! - config: print the effective configuration
//! - services: list the service directory

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// prochost - multi-process worker host
#[derive(Parser, Debug)]
#[command(name = "prochost")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the runtime, warm a spare and request hosts
    Run {
        /// Number of hosts to request
        #[arg(short = 'n', long, default_value_t = 1)]
        hosts: usize,

        /// Stop after this many seconds instead of waiting for Ctrl-C
        #[arg(short, long)]
        duration: Option<u64>,

        /// Play the workers in memory instead of spawning processes
        #[arg(long)]
        fake: bool,

        /// Do not warm a spare before the first request
        #[arg(long)]
        no_spare: bool,
    },

    /// Print the effective configuration as YAML
    Config,

    /// List configured services
    Services,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parse_no_args() {
        let cli = Cli::try_parse_from(["prochost"]).unwrap();
        assert!(cli.command.is_none());
        assert!(!cli.verbose);
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_cli_verbose_flag() {
        let cli = Cli::try_parse_from(["prochost", "-v"]).unwrap();
        assert!(cli.is_verbose());
    }

    #[test]
    fn test_cli_config_option() {
        let cli = Cli::try_parse_from(["prochost", "-c", "/path/to/prochost.yml"]).unwrap();
        assert_eq!(cli.config.as_ref(), Some(&PathBuf::from("/path/to/prochost.yml")));
    }

    #[test]
    fn test_run_defaults() {
        let cli = Cli::try_parse_from(["prochost", "run"]).unwrap();
        match cli.command {
            Some(Commands::Run {
                hosts,
                duration,
                fake,
                no_spare,
            }) => {
                assert_eq!(hosts, 1);
                assert!(duration.is_none());
                assert!(!fake);
                assert!(!no_spare);
            }
            _ => panic!("Expected run command"),
        }
    }

    #[test]
    fn test_run_with_options() {
        let cli = Cli::try_parse_from(["prochost", "run", "-n", "4", "--duration", "10", "--fake", "--no-spare"]).unwrap();
        match cli.command {
            Some(Commands::Run {
                hosts,
                duration,
                fake,
                no_spare,
            }) => {
                assert_eq!(hosts, 4);
                assert_eq!(duration, Some(10));
                assert!(fake);
                assert!(no_spare);
            }
            _ => panic!("Expected run command"),
        }
    }

    #[test]
    fn test_config_and_services() {
        let cli = Cli::try_parse_from(["prochost", "config"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Config)));
        let cli = Cli::try_parse_from(["prochost", "services", "-v"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Services)));
        assert!(cli.verbose);
    }

    #[test]
    fn test_invalid_subcommand() {
        assert!(Cli::try_parse_from(["prochost", "launch"]).is_err());
    }

    #[test]
    fn test_cli_debug_assert() {
        Cli::command().debug_assert();
    }
}
