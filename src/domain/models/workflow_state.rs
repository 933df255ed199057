//! Verification run state machine types.
//!
//! One `WorkflowState` per run, owned by the orchestrator and persisted
//! before every transition so a crashed run resumes from its last stage.
//!
//! ```text
//! Pending → Executing → EvidenceCollected → RedFlagChecked → Verifying
//!   Verifying → Accepted → Completed
//!   Verifying → Rejected → Diagnosing → FixSelected → FixApplying → Executing (loop)
//!   Executing → Diagnosing            (execution failed outright)
//!   FixApplying → FixSelected         (fix application failed)
//!   any → Escalated | TimedOut | Failed
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::fix::FixStrategy;
use super::learning::LearningQualifiers;
use super::run::{CodeHandle, VerificationRequest};
use crate::domain::errors::{DomainError, DomainResult};

/// Stage of a verification run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Pending,
    Executing,
    EvidenceCollected,
    RedFlagChecked,
    Verifying,
    Accepted,
    Rejected,
    Diagnosing,
    FixSelected,
    FixApplying,
    Completed,
    Escalated,
    TimedOut,
    Failed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Executing => "executing",
            Self::EvidenceCollected => "evidence_collected",
            Self::RedFlagChecked => "red_flag_checked",
            Self::Verifying => "verifying",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Diagnosing => "diagnosing",
            Self::FixSelected => "fix_selected",
            Self::FixApplying => "fix_applying",
            Self::Completed => "completed",
            Self::Escalated => "escalated",
            Self::TimedOut => "timed_out",
            Self::Failed => "failed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        let stage = match s {
            "pending" => Self::Pending,
            "executing" => Self::Executing,
            "evidence_collected" => Self::EvidenceCollected,
            "red_flag_checked" => Self::RedFlagChecked,
            "verifying" => Self::Verifying,
            "accepted" => Self::Accepted,
            "rejected" => Self::Rejected,
            "diagnosing" => Self::Diagnosing,
            "fix_selected" => Self::FixSelected,
            "fix_applying" => Self::FixApplying,
            "completed" => Self::Completed,
            "escalated" => Self::Escalated,
            "timed_out" => Self::TimedOut,
            "failed" => Self::Failed,
            _ => return None,
        };
        Some(stage)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Escalated | Self::TimedOut | Self::Failed
        )
    }

    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(&self, next: Stage) -> bool {
        if self.is_terminal() {
            return false;
        }
        if matches!(next, Self::TimedOut | Self::Failed) {
            return true;
        }
        matches!(
            (self, next),
            (Self::Pending, Self::Executing)
                | (Self::Executing, Self::EvidenceCollected)
                | (Self::Executing, Self::Diagnosing)
                | (Self::EvidenceCollected, Self::RedFlagChecked)
                | (Self::RedFlagChecked, Self::Verifying)
                | (Self::Verifying, Self::Accepted)
                | (Self::Verifying, Self::Rejected)
                | (Self::Accepted, Self::Completed)
                | (Self::Rejected, Self::Diagnosing)
                | (Self::Rejected, Self::Escalated)
                | (Self::Diagnosing, Self::FixSelected)
                | (Self::Diagnosing, Self::Escalated)
                | (Self::FixSelected, Self::FixApplying)
                | (Self::FixSelected, Self::Escalated)
                | (Self::FixApplying, Self::Executing)
                | (Self::FixApplying, Self::FixSelected)
                | (Self::FixApplying, Self::Escalated)
        )
    }

    /// Run status implied by being in this stage.
    pub fn status(&self) -> RunStatus {
        match self {
            Self::Completed => RunStatus::Completed,
            Self::Escalated => RunStatus::Escalated,
            Self::TimedOut => RunStatus::TimedOut,
            Self::Failed => RunStatus::Failed,
            _ => RunStatus::Running,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Escalated,
    TimedOut,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Escalated => "escalated",
            Self::TimedOut => "timed_out",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "escalated" => Some(Self::Escalated),
            "timed_out" => Some(Self::TimedOut),
            _ => None,
        }
    }
}

/// Fix chosen by the selector and awaiting its outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingFix {
    pub attempt_number: u32,
    pub tier_index: usize,
    pub tier_name: String,
    pub model: String,
    pub strategy: FixStrategy,
    pub failure_pattern: String,
    #[serde(default)]
    pub qualifiers: LearningQualifiers,
    pub cost_units: f64,
    pub started_at: DateTime<Utc>,
}

/// Snapshot of a completed stage, kept for the run's audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSnapshot {
    pub stage: Stage,
    pub attempt: u32,
    pub summary: String,
    pub at: DateTime<Utc>,
}

/// Persisted state of one verification run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub run_id: Uuid,
    /// Handle of the code currently under test; replaced after each applied fix.
    pub target: CodeHandle,
    pub criteria: Vec<String>,
    pub stage: Stage,
    pub status: RunStatus,
    /// Number of executions started so far (1-based key of evidence records).
    pub execution_attempt: u32,
    /// Fix attempts started so far.
    pub retry_count: u32,
    /// Tier ladder index of the last fix attempt.
    pub tier_index: Option<usize>,
    pub cumulative_cost: f64,
    pub pending_fix: Option<PendingFix>,
    pub stage_results: Vec<StageSnapshot>,
    /// Human-readable reason for a terminal state.
    pub reason: Option<String>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl WorkflowState {
    pub fn new(request: &VerificationRequest) -> Self {
        let now = Utc::now();
        Self {
            run_id: request.run_id,
            target: request.target.clone(),
            criteria: request.criteria.clone(),
            stage: Stage::Pending,
            status: RunStatus::Running,
            execution_attempt: 0,
            retry_count: 0,
            tier_index: None,
            cumulative_cost: 0.0,
            pending_fix: None,
            stage_results: Vec::new(),
            reason: None,
            error: None,
            started_at: now,
            updated_at: now,
            ended_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    /// Move to `next`, recording a snapshot of the stage being entered.
    pub fn transition(&mut self, next: Stage, summary: impl Into<String>) -> DomainResult<()> {
        if !self.stage.can_transition_to(next) {
            return Err(DomainError::InvalidStateTransition {
                from: self.stage.to_string(),
                to: next.to_string(),
                reason: format!("run {}", self.run_id),
            });
        }
        let now = Utc::now();
        self.stage = next;
        self.status = next.status();
        self.updated_at = now;
        self.stage_results.push(StageSnapshot {
            stage: next,
            attempt: self.execution_attempt,
            summary: summary.into(),
            at: now,
        });
        if next.is_terminal() {
            self.ended_at = Some(now);
        }
        Ok(())
    }

    /// Move to a terminal stage with a human-readable reason.
    pub fn terminate(
        &mut self,
        stage: Stage,
        reason: impl Into<String>,
        error: Option<String>,
    ) -> DomainResult<()> {
        let reason = reason.into();
        self.transition(stage, reason.clone())?;
        self.reason = Some(reason);
        self.error = error;
        Ok(())
    }
}
