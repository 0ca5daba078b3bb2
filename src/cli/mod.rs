//! Command-line interface for stackweave.
//!
//! This module provides the clap command definitions and the output
//! formatting shared by every command.

mod commands;
mod output;

pub use commands::{Cli, Commands, LogFormat, ManifestCommands, OutputFormat};
pub use output::OutputFormatter;
