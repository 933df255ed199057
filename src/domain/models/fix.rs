//! Fix strategies, model tiers and the fix attempt log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::root_cause::{Complexity, FailureCategory};

/// A concrete repair approach handed to the fix-application backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FixStrategy {
    SyntaxFix,
    TypeFix,
    ImportFix,
    ConfigFix,
    TimeoutIncrease,
    DependencyAdd,
    ApiUpdate,
    LogicFix,
    EdgeCaseFix,
    EnvSetup,
    Refactor,
    AlgorithmFix,
}

impl FixStrategy {
    pub const ALL: [FixStrategy; 12] = [
        Self::SyntaxFix,
        Self::TypeFix,
        Self::ImportFix,
        Self::ConfigFix,
        Self::TimeoutIncrease,
        Self::DependencyAdd,
        Self::ApiUpdate,
        Self::LogicFix,
        Self::EdgeCaseFix,
        Self::EnvSetup,
        Self::Refactor,
        Self::AlgorithmFix,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SyntaxFix => "syntax-fix",
            Self::TypeFix => "type-fix",
            Self::ImportFix => "import-fix",
            Self::ConfigFix => "config-fix",
            Self::TimeoutIncrease => "timeout-increase",
            Self::DependencyAdd => "dependency-add",
            Self::ApiUpdate => "api-update",
            Self::LogicFix => "logic-fix",
            Self::EdgeCaseFix => "edge-case-fix",
            Self::EnvSetup => "env-setup",
            Self::Refactor => "refactor",
            Self::AlgorithmFix => "algorithm-fix",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        let normalized = s.trim().to_lowercase().replace('_', "-");
        Self::ALL.into_iter().find(|st| st.as_str() == normalized)
    }

    /// Structural complexity of applying this strategy.
    pub fn complexity(&self) -> Complexity {
        match self {
            Self::SyntaxFix
            | Self::TypeFix
            | Self::ImportFix
            | Self::ConfigFix
            | Self::TimeoutIncrease => Complexity::Simple,
            Self::DependencyAdd
            | Self::ApiUpdate
            | Self::LogicFix
            | Self::EdgeCaseFix
            | Self::EnvSetup => Complexity::Moderate,
            Self::Refactor | Self::AlgorithmFix => Complexity::Complex,
        }
    }

    /// Fixed candidate list for a failure category, in preference order.
    pub fn candidates_for(category: FailureCategory) -> &'static [FixStrategy] {
        match category {
            FailureCategory::Syntax => &[Self::SyntaxFix, Self::TypeFix, Self::ImportFix, Self::Refactor],
            FailureCategory::Logic => &[
                Self::LogicFix,
                Self::EdgeCaseFix,
                Self::AlgorithmFix,
                Self::Refactor,
            ],
            FailureCategory::Integration => &[
                Self::ImportFix,
                Self::DependencyAdd,
                Self::ApiUpdate,
                Self::ConfigFix,
                Self::Refactor,
            ],
            FailureCategory::Environment => &[
                Self::ConfigFix,
                Self::TimeoutIncrease,
                Self::EnvSetup,
                Self::DependencyAdd,
            ],
        }
    }
}

impl std::fmt::Display for FixStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One rung of the model escalation ladder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ModelTier {
    pub name: String,
    pub model: String,
    /// Cost units charged per fix attempt on this tier.
    pub cost_per_attempt: f64,
}

impl ModelTier {
    pub fn new(name: impl Into<String>, model: impl Into<String>, cost_per_attempt: f64) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            cost_per_attempt,
        }
    }
}

/// Default cheap → balanced → most-capable ladder.
pub fn default_tiers() -> Vec<ModelTier> {
    vec![
        ModelTier::new("cheap", "haiku", 1.0),
        ModelTier::new("balanced", "sonnet", 4.0),
        ModelTier::new("most_capable", "opus", 19.0),
    ]
}

/// One escalation step. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixAttempt {
    pub run_id: Uuid,
    /// 1-based attempt number within the run.
    pub attempt_number: u32,
    /// Zero-based index into the tier ladder.
    pub tier_index: usize,
    pub tier_name: String,
    pub model: String,
    pub strategy: FixStrategy,
    pub failure_pattern: String,
    pub success: bool,
    pub cost_units: f64,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// Strategies that already failed within an attempt history.
pub fn failed_strategies(history: &[FixAttempt]) -> Vec<FixStrategy> {
    let mut failed: Vec<FixStrategy> = history
        .iter()
        .filter(|a| !a.success)
        .map(|a| a.strategy)
        .collect();
    failed.sort();
    failed.dedup();
    failed
}
