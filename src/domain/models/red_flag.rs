//! Red flags raised over an evidence bundle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Severity of a red flag. Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

/// What kind of deception or incompleteness a flag points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedFlagCategory {
    MissingEvidence,
    InconsistentEvidence,
    UnverifiedToolClaim,
    TimingAnomaly,
    CoverageRegression,
}

impl RedFlagCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingEvidence => "missing_evidence",
            Self::InconsistentEvidence => "inconsistent_evidence",
            Self::UnverifiedToolClaim => "unverified_tool_claim",
            Self::TimingAnomaly => "timing_anomaly",
            Self::CoverageRegression => "coverage_regression",
        }
    }
}

/// A single finding from the red flag detector. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedFlag {
    pub id: Uuid,
    pub run_id: Uuid,
    pub attempt: u32,
    pub severity: Severity,
    pub category: RedFlagCategory,
    pub description: String,
    /// Content hashes of the artifacts that triggered this flag.
    pub artifact_refs: Vec<String>,
    pub detected_at: DateTime<Utc>,
}

impl RedFlag {
    pub fn new(
        run_id: Uuid,
        attempt: u32,
        severity: Severity,
        category: RedFlagCategory,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id,
            attempt,
            severity,
            category,
            description: description.into(),
            artifact_refs: Vec::new(),
            detected_at: Utc::now(),
        }
    }

    pub fn with_artifacts<I, S>(mut self, refs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.artifact_refs.extend(refs.into_iter().map(Into::into));
        self
    }

    pub fn is_critical(&self) -> bool {
        self.severity == Severity::Critical
    }
}

/// Highest severity among a set of flags.
pub fn max_severity(flags: &[RedFlag]) -> Option<Severity> {
    flags.iter().map(|f| f.severity).max()
}
