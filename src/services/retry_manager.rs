//! Retry and tier management.
//!
//! Walks the model tier ladder one rung per fix attempt, enforces the
//! attempt ceiling and cost budget, and closes every attempt by appending it
//! to the run's log and counting it in the learning store in one write.

use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use super::fix_strategy_selector::StrategySelection;
use super::root_cause_analyzer::pattern_regex;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Complexity, FixAttempt, LearningQualifiers, ModelTier, PendingFix, RetryConfig,
    RootCauseAnalysis, WorkflowState,
};
use crate::domain::ports::RunRecordRepository;

const COST_EPSILON: f64 = 1e-9;

/// The next rung to try.
#[derive(Debug, Clone, PartialEq)]
pub struct TierPlan {
    pub attempt_number: u32,
    pub tier_index: usize,
    pub tier: ModelTier,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    Attempt(TierPlan),
    /// Stop automated repair; the string is the human-readable reason.
    Escalate(String),
}

pub struct RetryManager {
    config: RetryConfig,
    records: Arc<dyn RunRecordRepository>,
}

impl RetryManager {
    pub fn new(config: RetryConfig, records: Arc<dyn RunRecordRepository>) -> Self {
        Self { config, records }
    }

    pub fn tier_count(&self) -> usize {
        self.config.tiers.len()
    }

    /// Decide whether another fix attempt is allowed and on which tier.
    ///
    /// The first attempt starts at the tier matching the diagnosed complexity;
    /// every later attempt moves exactly one rung up, staying on the top rung
    /// once it is reached.
    pub fn plan_next(&self, state: &WorkflowState, complexity: Complexity) -> RetryDecision {
        if state.retry_count >= self.config.max_attempts {
            return RetryDecision::Escalate(format!(
                "retry ceiling of {} fix attempts reached",
                self.config.max_attempts
            ));
        }
        let Some(top) = self.config.tiers.len().checked_sub(1) else {
            return RetryDecision::Escalate("no model tiers configured".to_string());
        };

        let tier_index = match state.tier_index {
            None => complexity.level().min(top),
            Some(previous) => (previous + 1).min(top),
        };
        let tier = self.config.tiers[tier_index].clone();

        if let Some(budget) = self.config.max_cost_units {
            let projected = state.cumulative_cost + tier.cost_per_attempt;
            if projected > budget + COST_EPSILON {
                return RetryDecision::Escalate(format!(
                    "cost budget of {budget:.2} units would be exceeded ({:.2} spent, tier '{}' costs {:.2})",
                    state.cumulative_cost, tier.name, tier.cost_per_attempt
                ));
            }
        }

        RetryDecision::Attempt(TierPlan {
            attempt_number: state.retry_count + 1,
            tier_index,
            tier,
        })
    }

    /// The in-flight attempt record for a chosen tier and strategy.
    pub fn pending_fix(
        &self,
        plan: &TierPlan,
        selection: &StrategySelection,
        analysis: &RootCauseAnalysis,
    ) -> PendingFix {
        let mut qualifiers = LearningQualifiers::default().with_complexity(analysis.complexity);
        if let Some(file_pattern) = &analysis.file_pattern {
            qualifiers = qualifiers.with_file_pattern(file_pattern.clone());
        }
        if analysis.error_excerpt.is_some() {
            qualifiers = qualifiers.with_error_regex(pattern_regex(&analysis.failure_pattern));
        }

        PendingFix {
            attempt_number: plan.attempt_number,
            tier_index: plan.tier_index,
            tier_name: plan.tier.name.clone(),
            model: plan.tier.model.clone(),
            strategy: selection.strategy,
            failure_pattern: analysis.failure_pattern.clone(),
            qualifiers,
            cost_units: plan.tier.cost_per_attempt,
            started_at: Utc::now(),
        }
    }

    /// Close an attempt: append it to the run log and count it in the learning store.
    ///
    /// Both writes commit together, so closing the same attempt twice (after
    /// a restart) is a no-op and a crash never leaves one without the other.
    pub async fn complete_attempt(
        &self,
        run_id: Uuid,
        pending: &PendingFix,
        success: bool,
        error_message: Option<String>,
    ) -> DomainResult<FixAttempt> {
        let attempt = FixAttempt {
            run_id,
            attempt_number: pending.attempt_number,
            tier_index: pending.tier_index,
            tier_name: pending.tier_name.clone(),
            model: pending.model.clone(),
            strategy: pending.strategy,
            failure_pattern: pending.failure_pattern.clone(),
            success,
            cost_units: pending.cost_units,
            error_message,
            started_at: pending.started_at,
            completed_at: Utc::now(),
        };

        match self.records.close_fix_attempt(&attempt, &pending.qualifiers).await {
            Ok(learning) => {
                tracing::debug!(
                    pattern = %learning.failure_pattern,
                    strategy = learning.fix_strategy.as_str(),
                    tried = learning.times_tried,
                    succeeded = learning.times_succeeded,
                    "fix outcome recorded"
                );
            }
            Err(DomainError::ImmutableRecord { .. }) => {
                tracing::debug!(%run_id, attempt = pending.attempt_number, "fix attempt already closed");
            }
            Err(e) => return Err(e),
        }

        tracing::info!(
            %run_id,
            attempt = attempt.attempt_number,
            tier = %attempt.tier_name,
            strategy = attempt.strategy.as_str(),
            success,
            "fix attempt closed"
        );
        Ok(attempt)
    }
}
