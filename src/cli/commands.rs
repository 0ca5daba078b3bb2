//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Stackweave - dependency-aware provisioning planner.
#[derive(Parser, Debug)]
#[command(name = "stackweave")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the stack file.
    #[arg(short, long, global = true, env = "STACKWEAVE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Log format (text, json).
    #[arg(long, global = true, default_value = "text", env = "STACKWEAVE_LOG_FORMAT")]
    pub log_format: LogFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate the stack file.
    Validate {
        /// Show all warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Compute and display the apply plan without executing it.
    Plan,

    /// Execute the apply plan.
    Apply {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,

        /// Maximum provider calls in flight.
        #[arg(long)]
        concurrency: Option<usize>,

        /// Plan only, never call the provider.
        #[arg(long)]
        dry_run: bool,

        /// Cancel remaining nodes after this many seconds.
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Show the object sync plan of one target.
    Sync {
        /// Sync target name.
        #[arg(short, long)]
        target: String,
    },

    /// Inspect stored manifests and the store lock.
    Manifest {
        /// Manifest subcommand.
        #[command(subcommand)]
        command: ManifestCommands,
    },
}

/// Manifest store subcommands.
#[derive(Subcommand, Debug)]
pub enum ManifestCommands {
    /// Show the stored manifest of a sync target.
    Show {
        /// Sync target name.
        #[arg(short, long)]
        target: String,
    },

    /// Show recent runs.
    History {
        /// Number of runs to show.
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Release the store lock.
    Unlock {
        /// Lock ID to release.
        #[arg(long)]
        lock_id: Option<String>,

        /// Remove the lock whoever holds it.
        #[arg(long, conflicts_with = "lock_id")]
        force: bool,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

/// Log format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable log lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_apply_flags() {
        let cli = Cli::try_parse_from([
            "stackweave",
            "--output",
            "json",
            "apply",
            "--yes",
            "--concurrency",
            "8",
            "--timeout",
            "60",
        ])
        .expect("valid arguments");

        assert_eq!(cli.output, OutputFormat::Json);
        match cli.command {
            Commands::Apply {
                yes,
                concurrency,
                dry_run,
                timeout,
            } => {
                assert!(yes);
                assert_eq!(concurrency, Some(8));
                assert!(!dry_run);
                assert_eq!(timeout, Some(60));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_unlock_flags_conflict() {
        let result = Cli::try_parse_from([
            "stackweave",
            "manifest",
            "unlock",
            "--force",
            "--lock-id",
            "abc",
        ]);
        assert!(result.is_err());
    }
}
