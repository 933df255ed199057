//! Requests and reports exchanged with external callers.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::evidence::EvidenceBundle;
use super::fix::FixAttempt;
use super::red_flag::RedFlag;
use super::root_cause::RootCauseAnalysis;
use super::verification::VerificationReport;
use super::workflow_state::WorkflowState;

/// Opaque reference to a code change, interpreted only by the execution backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CodeHandle(String);

impl CodeHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CodeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Request from the upstream pipeline to verify one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationRequest {
    pub run_id: Uuid,
    pub target: CodeHandle,
    pub criteria: Vec<String>,
}

impl VerificationRequest {
    pub fn new(run_id: Uuid, target: CodeHandle, criteria: Vec<String>) -> Self {
        Self {
            run_id,
            target,
            criteria,
        }
    }
}

/// Result of `start_verification`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartOutcome {
    Accepted,
    AlreadyExists,
}

/// Full trail of a run, for human review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub state: WorkflowState,
    pub latest_bundle: Option<EvidenceBundle>,
    pub verification: Option<VerificationReport>,
    pub red_flags: Vec<RedFlag>,
    pub root_cause: Option<RootCauseAnalysis>,
    pub fix_attempts: Vec<FixAttempt>,
}
