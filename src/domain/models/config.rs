use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::fix::{default_tiers, ModelTier};

/// Main configuration structure for verifix
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Maximum number of runs holding an execution slot at once (1-64)
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Fix retry and tier escalation policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Per-stage deadlines
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Independent verifier thresholds
    #[serde(default)]
    pub verifier: VerifierConfig,

    /// Red flag detector tolerances
    #[serde(default)]
    pub detector: DetectorConfig,

    /// Fix learning store thresholds
    #[serde(default)]
    pub learning: LearningConfig,

    /// Artifact store location
    #[serde(default)]
    pub artifacts: ArtifactsConfig,
}

const fn default_max_concurrent_runs() -> usize {
    2
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent_runs: default_max_concurrent_runs(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            retry: RetryConfig::default(),
            timeouts: TimeoutConfig::default(),
            verifier: VerifierConfig::default(),
            detector: DetectorConfig::default(),
            learning: LearningConfig::default(),
            artifacts: ArtifactsConfig::default(),
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to `SQLite` database file
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".verifix/verifix.db".to_string()
}

const fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<String>,

    /// Rotation: daily, hourly or never
    #[serde(default = "default_rotation")]
    pub rotation: String,

    #[serde(default = "default_true")]
    pub enable_stdout: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

const fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
            enable_stdout: default_true(),
        }
    }
}

/// Fix retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Hard ceiling on fix attempts per run
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Ordered model tier ladder, cheapest first
    #[serde(default = "default_tiers")]
    pub tiers: Vec<ModelTier>,

    /// Optional cumulative cost budget per run
    #[serde(default)]
    pub max_cost_units: Option<f64>,

    /// Same-stage retries after a stage error
    #[serde(default = "default_stage_retries")]
    pub stage_retries: u32,
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_stage_retries() -> u32 {
    1
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            tiers: default_tiers(),
            max_cost_units: None,
            stage_retries: default_stage_retries(),
        }
    }
}

/// Per-stage deadlines in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    #[serde(default = "default_execution_ms")]
    pub execution_ms: u64,
    #[serde(default = "default_detection_ms")]
    pub detection_ms: u64,
    #[serde(default = "default_verification_ms")]
    pub verification_ms: u64,
    #[serde(default = "default_diagnosis_ms")]
    pub diagnosis_ms: u64,
    #[serde(default = "default_fix_application_ms")]
    pub fix_application_ms: u64,
}

const fn default_execution_ms() -> u64 {
    600_000
}

const fn default_detection_ms() -> u64 {
    30_000
}

const fn default_verification_ms() -> u64 {
    120_000
}

const fn default_diagnosis_ms() -> u64 {
    120_000
}

const fn default_fix_application_ms() -> u64 {
    600_000
}

impl TimeoutConfig {
    pub fn execution(&self) -> Duration {
        Duration::from_millis(self.execution_ms)
    }

    pub fn detection(&self) -> Duration {
        Duration::from_millis(self.detection_ms)
    }

    pub fn verification(&self) -> Duration {
        Duration::from_millis(self.verification_ms)
    }

    pub fn diagnosis(&self) -> Duration {
        Duration::from_millis(self.diagnosis_ms)
    }

    pub fn fix_application(&self) -> Duration {
        Duration::from_millis(self.fix_application_ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            execution_ms: default_execution_ms(),
            detection_ms: default_detection_ms(),
            verification_ms: default_verification_ms(),
            diagnosis_ms: default_diagnosis_ms(),
            fix_application_ms: default_fix_application_ms(),
        }
    }
}

/// Independent verifier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct VerifierConfig {
    /// Minimum confidence for accept (inclusive)
    #[serde(default = "default_accept_threshold")]
    pub accept_threshold: u8,

    /// Confidence below this rejects outright
    #[serde(default = "default_reject_threshold")]
    pub reject_threshold: u8,

    /// Identity of the reviewing process; must differ from the executor's
    #[serde(default = "default_reviewer_id")]
    pub reviewer_id: String,
}

const fn default_accept_threshold() -> u8 {
    85
}

const fn default_reject_threshold() -> u8 {
    50
}

fn default_reviewer_id() -> String {
    "verifix-reviewer".to_string()
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            accept_threshold: default_accept_threshold(),
            reject_threshold: default_reject_threshold(),
            reviewer_id: default_reviewer_id(),
        }
    }
}

/// Red flag detector tolerances
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DetectorConfig {
    /// A claimed test suite finishing faster than this is implausible
    #[serde(default = "default_min_suite_duration_ms")]
    pub min_suite_duration_ms: u64,

    /// Coverage may drop by this many points between attempts without a flag
    #[serde(default = "default_coverage_tolerance")]
    pub coverage_tolerance_percent: f64,

    /// Allowed clock skew for artifact timestamps around the execution window
    #[serde(default = "default_timestamp_skew_ms")]
    pub timestamp_skew_ms: u64,
}

const fn default_min_suite_duration_ms() -> u64 {
    100
}

const fn default_coverage_tolerance() -> f64 {
    0.5
}

const fn default_timestamp_skew_ms() -> u64 {
    1_000
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_suite_duration_ms: default_min_suite_duration_ms(),
            coverage_tolerance_percent: default_coverage_tolerance(),
            timestamp_skew_ms: default_timestamp_skew_ms(),
        }
    }
}

/// Fix learning store thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LearningConfig {
    /// Success rate a strategy must strictly exceed to be reused
    #[serde(default = "default_reliability_threshold")]
    pub reliability_threshold: f64,

    /// Attempts required before a success rate counts
    #[serde(default = "default_min_samples")]
    pub min_samples: u32,

    /// Keyword overlap needed for a near-match pattern
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
}

const fn default_reliability_threshold() -> f64 {
    0.7
}

const fn default_min_samples() -> u32 {
    1
}

const fn default_similarity_threshold() -> f64 {
    0.5
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            reliability_threshold: default_reliability_threshold(),
            min_samples: default_min_samples(),
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

/// Artifact store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ArtifactsConfig {
    /// Root directory for content-addressed artifact bytes
    #[serde(default = "default_artifacts_root")]
    pub root: String,
}

fn default_artifacts_root() -> String {
    ".verifix/artifacts".to_string()
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            root: default_artifacts_root(),
        }
    }
}
