//! Root cause analysis of a failed attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::fix::FixStrategy;

/// Broad classification of why an attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    Syntax,
    Logic,
    Integration,
    Environment,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Syntax => "syntax",
            Self::Logic => "logic",
            Self::Integration => "integration",
            Self::Environment => "environment",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "syntax" => Some(Self::Syntax),
            "logic" => Some(Self::Logic),
            "integration" => Some(Self::Integration),
            "environment" => Some(Self::Environment),
            _ => None,
        }
    }
}

/// Estimated effort to repair a failure. Ordered from cheapest to most expensive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
}

impl Complexity {
    /// Zero-based level, aligned with tier ladder indices.
    pub fn level(&self) -> usize {
        match self {
            Self::Simple => 0,
            Self::Moderate => 1,
            Self::Complex => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Moderate => "moderate",
            Self::Complex => "complex",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "simple" => Some(Self::Simple),
            "moderate" => Some(Self::Moderate),
            "complex" => Some(Self::Complex),
            _ => None,
        }
    }
}

/// Diagnosis of one failing attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootCauseAnalysis {
    pub id: Uuid,
    pub run_id: Uuid,
    pub attempt: u32,
    pub category: FailureCategory,
    pub root_cause: String,
    pub recommended_strategy: Option<FixStrategy>,
    pub complexity: Complexity,
    /// Normalized failure signature, used as the learning-store key.
    pub failure_pattern: String,
    pub error_excerpt: Option<String>,
    pub file_pattern: Option<String>,
    pub created_at: DateTime<Utc>,
}
