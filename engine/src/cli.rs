//! CLI interface for plugd
//!
//! This module provides the command-line interface using clap's derive API.
//! It defines the commands and global flags for driving the plugin host.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// plugd plugin host
///
/// Discovers plugins, verifies their signatures and supervises their
/// backend processes.
#[derive(Parser, Debug)]
#[command(name = "plugd")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Discover and verify plugins, then print what was loaded
    Scan {
        /// Directories to scan instead of the configured roots
        paths: Vec<PathBuf>,
    },

    /// Compute the signature of a single plugin directory
    Verify {
        /// Directory containing plugin.json
        dir: PathBuf,
    },

    /// Load plugins and supervise their backends until interrupted
    Run {
        /// Directories to scan instead of the configured roots
        paths: Vec<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_without_paths() {
        let cli = Cli::parse_from(["plugd", "scan"]);
        assert!(matches!(cli.command, Command::Scan { paths } if paths.is_empty()));
        assert!(!cli.json);
    }

    #[test]
    fn test_scan_with_paths_and_global_flags() {
        let cli = Cli::parse_from(["plugd", "scan", "/a", "/b", "--json", "--log", "debug"]);
        assert!(cli.json);
        assert_eq!(cli.log.as_deref(), Some("debug"));
        if let Command::Scan { paths } = cli.command {
            assert_eq!(paths, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
        } else {
            panic!("Expected Scan command");
        }
    }

    #[test]
    fn test_verify_requires_dir() {
        assert!(Cli::try_parse_from(["plugd", "verify"]).is_err());

        let cli = Cli::parse_from(["plugd", "verify", "./my-plugin"]);
        assert!(matches!(cli.command, Command::Verify { dir } if dir == PathBuf::from("./my-plugin")));
    }

    #[test]
    fn test_run_with_config() {
        let cli = Cli::parse_from(["plugd", "--config", "/etc/plugd.toml", "run"]);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/plugd.toml")));
        assert!(matches!(cli.command, Command::Run { .. }));
    }
}
