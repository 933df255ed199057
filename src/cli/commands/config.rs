//! Configuration inspection commands.

use anyhow::Result;
use clap::{Args, Subcommand};
use serde::Serialize;

use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Config;

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the effective configuration after all layers are merged
    Show,
    /// Load and validate the configuration without printing it
    Check,
}

#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct ConfigOutput {
    pub config: Config,
}

impl CommandOutput for ConfigOutput {
    fn to_human(&self) -> String {
        serde_yaml::to_string(&self.config).unwrap_or_default()
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[derive(Debug, Serialize)]
pub struct ConfigCheckOutput {
    pub valid: bool,
    pub max_concurrent_runs: usize,
    pub tiers: Vec<String>,
}

impl CommandOutput for ConfigCheckOutput {
    fn to_human(&self) -> String {
        format!(
            "Configuration is valid: {} concurrent run(s), tier ladder {}",
            self.max_concurrent_runs,
            self.tiers.join(" -> ")
        )
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub fn execute(args: ConfigArgs, config: Config, json_mode: bool) -> Result<()> {
    match args.command {
        ConfigCommands::Show => output(&ConfigOutput { config }, json_mode),
        ConfigCommands::Check => {
            let out = ConfigCheckOutput {
                valid: true,
                max_concurrent_runs: config.max_concurrent_runs,
                tiers: config.retry.tiers.iter().map(|t| t.name.clone()).collect(),
            };
            output(&out, json_mode);
        }
    }
    Ok(())
}
