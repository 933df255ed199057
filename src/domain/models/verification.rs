//! Verification report produced by the independent verifier.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ternary verdict of a verification pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Accept,
    /// Inconclusive. Treated as reject for automation and flagged for escalation.
    Review,
    Reject,
}

impl Recommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Review => "review",
            Self::Reject => "reject",
        }
    }

    pub fn is_accept(&self) -> bool {
        matches!(self, Self::Accept)
    }
}

/// Which sub-pass of the verifier produced a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationPass {
    Integrity,
    CrossValidation,
    Skeptical,
}

/// How a piece of evidence bears on the claim of success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingVerdict {
    Supports,
    Neutral,
    Contradicts,
}

/// Per-evidence-item finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceFinding {
    pub pass: VerificationPass,
    /// Content hash of the artifact, when the finding is about one artifact.
    pub artifact_ref: Option<String>,
    pub verdict: FindingVerdict,
    pub note: String,
}

impl EvidenceFinding {
    pub fn new(pass: VerificationPass, verdict: FindingVerdict, note: impl Into<String>) -> Self {
        Self {
            pass,
            artifact_ref: None,
            verdict,
            note: note.into(),
        }
    }

    pub fn for_artifact(mut self, hash: impl Into<String>) -> Self {
        self.artifact_ref = Some(hash.into());
        self
    }
}

/// Outcome of one verifier pass over one bundle. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub id: Uuid,
    pub run_id: Uuid,
    pub attempt: u32,
    /// Identity of the reviewer that produced this report.
    pub reviewer_id: String,
    /// Confidence in [0, 100].
    pub confidence: u8,
    pub integrity_score: f64,
    pub cross_validation_score: f64,
    pub skeptical_score: f64,
    pub recommendation: Recommendation,
    pub findings: Vec<EvidenceFinding>,
    pub cross_validation_notes: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl VerificationReport {
    pub fn contradictions(&self) -> impl Iterator<Item = &EvidenceFinding> {
        self.findings
            .iter()
            .filter(|f| f.verdict == FindingVerdict::Contradicts)
    }
}
