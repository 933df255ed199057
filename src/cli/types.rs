//! CLI type definitions
//!
//! This module contains clap command structures that define the CLI interface.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use super::commands::{
    config::ConfigArgs, learning::LearningArgs, replay::ReplayArgs, run::{ReportArgs, ResumeArgs, StatusArgs},
};

#[derive(Parser)]
#[command(name = "verifix")]
#[command(about = "Verifix - evidence-based verification with cost-aware fix retries", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Configuration file (defaults to .verifix/config.yaml and .verifix/local.yaml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Drive one verification run against a scripted execution backend
    Replay(ReplayArgs),

    /// Show the state of one run, or list recent runs
    Status(StatusArgs),

    /// Show the full evidence and fix trail of a run
    Report(ReportArgs),

    /// Resume every run left unfinished by a previous process
    Resume(ResumeArgs),

    /// Inspect the fix learning store
    Learning(LearningArgs),

    /// Inspect the effective configuration
    Config(ConfigArgs),
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["verifix", "status", "--json", "--config", "x.yaml"]).unwrap();
        assert!(cli.json);
        assert_eq!(cli.config, Some(PathBuf::from("x.yaml")));
        assert!(matches!(cli.command, Commands::Status(_)));
    }
}
