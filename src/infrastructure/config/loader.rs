use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use thiserror::Error;

use crate::domain::models::config::Config;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid max_concurrent_runs: {0}. Must be between 1 and 64")]
    InvalidMaxConcurrentRuns(usize),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidLogRotation(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Invalid max_attempts: {0}. Must be at least 1")]
    InvalidMaxAttempts(u32),

    #[error("The model tier ladder must contain at least one tier")]
    EmptyTierLadder,

    #[error("Invalid tier '{0}': name and model must be set and cost must be non-negative")]
    InvalidTier(String),

    #[error("Invalid cost budget: {0}. Must be positive")]
    InvalidCostBudget(f64),

    #[error("Invalid timeout for {0}: must be greater than 0 ms")]
    InvalidTimeout(&'static str),

    #[error(
        "Invalid verifier thresholds: reject ({reject}) must be below accept ({accept}) and both within 0-100"
    )]
    InvalidThresholds { accept: u8, reject: u8 },

    #[error("Reviewer identity cannot be empty")]
    EmptyReviewerId,

    #[error("Invalid {0}: {1}. Must be in (0, 1]")]
    InvalidRatio(&'static str, f64),

    #[error("Invalid coverage tolerance: {0}. Cannot be negative")]
    InvalidCoverageTolerance(f64),

    #[error("Artifact root cannot be empty")]
    EmptyArtifactRoot,
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .verifix/config.yaml (project config)
    /// 3. .verifix/local.yaml (local overrides, optional)
    /// 4. Environment variables (VERIFIX_* prefix, `__` separates nested keys)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".verifix/config.yaml"))
            .merge(Yaml::file(".verifix/local.yaml"))
            .merge(Env::prefixed("VERIFIX_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("VERIFIX_").split("__"))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.max_concurrent_runs == 0 || config.max_concurrent_runs > 64 {
            return Err(ConfigError::InvalidMaxConcurrentRuns(config.max_concurrent_runs));
        }

        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(
                config.database.max_connections,
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }
        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidLogRotation(config.logging.rotation.clone()));
        }

        // Retry ladder
        if config.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidMaxAttempts(config.retry.max_attempts));
        }
        if config.retry.tiers.is_empty() {
            return Err(ConfigError::EmptyTierLadder);
        }
        for tier in &config.retry.tiers {
            if tier.name.is_empty() || tier.model.is_empty() || tier.cost_per_attempt < 0.0 {
                return Err(ConfigError::InvalidTier(tier.name.clone()));
            }
        }
        if let Some(budget) = config.retry.max_cost_units {
            if budget <= 0.0 {
                return Err(ConfigError::InvalidCostBudget(budget));
            }
        }

        let timeouts = &config.timeouts;
        for (stage, ms) in [
            ("execution", timeouts.execution_ms),
            ("detection", timeouts.detection_ms),
            ("verification", timeouts.verification_ms),
            ("diagnosis", timeouts.diagnosis_ms),
            ("fix_application", timeouts.fix_application_ms),
        ] {
            if ms == 0 {
                return Err(ConfigError::InvalidTimeout(stage));
            }
        }

        let verifier = &config.verifier;
        if verifier.accept_threshold > 100 || verifier.reject_threshold >= verifier.accept_threshold {
            return Err(ConfigError::InvalidThresholds {
                accept: verifier.accept_threshold,
                reject: verifier.reject_threshold,
            });
        }
        if verifier.reviewer_id.trim().is_empty() {
            return Err(ConfigError::EmptyReviewerId);
        }

        if config.detector.coverage_tolerance_percent < 0.0 {
            return Err(ConfigError::InvalidCoverageTolerance(
                config.detector.coverage_tolerance_percent,
            ));
        }

        for (name, value) in [
            ("reliability_threshold", config.learning.reliability_threshold),
            ("similarity_threshold", config.learning.similarity_threshold),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ConfigError::InvalidRatio(name, value));
            }
        }

        if config.artifacts.root.is_empty() {
            return Err(ConfigError::EmptyArtifactRoot);
        }

        Ok(())
    }
}
