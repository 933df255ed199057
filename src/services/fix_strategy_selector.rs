//! Fix strategy selection.
//!
//! Precedence, first match wins:
//! 1. a reliable learned fix for the failure pattern (exact, then similar)
//! 2. the strategy recommended by the root cause analysis
//! 3. the category's candidate list, matched against the tier's complexity
//!    with the knowledge graph breaking ties
//!
//! A strategy that already failed within the run is never chosen again.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use super::fix_learning_store::FixLearningStore;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{failed_strategies, FixAttempt, FixStrategy, RootCauseAnalysis};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionSource {
    Learned,
    Diagnosed,
    Candidate,
}

impl SelectionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Learned => "learned",
            Self::Diagnosed => "diagnosed",
            Self::Candidate => "candidate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategySelection {
    pub strategy: FixStrategy,
    pub source: SelectionSource,
    pub reason: String,
}

pub struct FixStrategySelector {
    learning: Arc<FixLearningStore>,
}

/// Complexity level a tier is expected to handle, spread over 0..=2.
fn tier_level(tier_index: usize, tier_count: usize) -> usize {
    if tier_count <= 1 {
        return 0;
    }
    (tier_index.min(tier_count - 1) * 2 + (tier_count - 1) / 2) / (tier_count - 1)
}

/// Pick from a category's candidates for the given tier.
///
/// Closest complexity to the tier wins; pooled success rate from the
/// knowledge graph breaks ties, then list order.
pub fn pick_candidate(
    candidates: &[FixStrategy],
    excluded: &[FixStrategy],
    level: usize,
    rank: &HashMap<FixStrategy, f64>,
) -> Option<FixStrategy> {
    candidates
        .iter()
        .enumerate()
        .filter(|(_, s)| !excluded.contains(*s))
        .min_by(|(ia, a), (ib, b)| {
            let da = a.complexity().level().abs_diff(level);
            let db = b.complexity().level().abs_diff(level);
            let ra = rank.get(*a).copied().unwrap_or(0.0);
            let rb = rank.get(*b).copied().unwrap_or(0.0);
            da.cmp(&db)
                .then_with(|| rb.partial_cmp(&ra).unwrap_or(std::cmp::Ordering::Equal))
                .then_with(|| ia.cmp(ib))
        })
        .map(|(_, s)| *s)
}

impl FixStrategySelector {
    pub fn new(learning: Arc<FixLearningStore>) -> Self {
        Self { learning }
    }

    pub async fn select(
        &self,
        analysis: &RootCauseAnalysis,
        history: &[FixAttempt],
        tier_index: usize,
        tier_count: usize,
    ) -> DomainResult<StrategySelection> {
        let failed = failed_strategies(history);

        let learned = self.learning.reliable_fixes(&analysis.failure_pattern).await?;
        if let Some(fix) = learned.iter().find(|l| !failed.contains(&l.fix_strategy)) {
            let via = if fix.failure_pattern == analysis.failure_pattern {
                "this pattern".to_string()
            } else {
                format!("similar pattern '{}'", fix.failure_pattern)
            };
            return Ok(self.chosen(
                analysis,
                fix.fix_strategy,
                SelectionSource::Learned,
                format!(
                    "succeeded {}/{} times for {via}",
                    fix.times_succeeded, fix.times_tried
                ),
            ));
        }

        if let Some(strategy) = analysis.recommended_strategy.filter(|s| !failed.contains(s)) {
            return Ok(self.chosen(
                analysis,
                strategy,
                SelectionSource::Diagnosed,
                format!("recommended for {} failure", analysis.category.as_str()),
            ));
        }

        let rank = self.learning.graph().await?.strategy_rank();
        let level = tier_level(tier_index, tier_count);
        let candidates = FixStrategy::candidates_for(analysis.category);
        match pick_candidate(candidates, &failed, level, &rank) {
            Some(strategy) => Ok(self.chosen(
                analysis,
                strategy,
                SelectionSource::Candidate,
                format!(
                    "{} candidate for tier {} ({})",
                    analysis.category.as_str(),
                    tier_index + 1,
                    strategy.complexity().as_str()
                ),
            )),
            None => {
                tracing::warn!(
                    run_id = %analysis.run_id,
                    pattern = %analysis.failure_pattern,
                    tried = failed.len(),
                    "no untried strategy left"
                );
                Err(DomainError::StrategiesExhausted(analysis.failure_pattern.clone()))
            }
        }
    }

    fn chosen(
        &self,
        analysis: &RootCauseAnalysis,
        strategy: FixStrategy,
        source: SelectionSource,
        reason: String,
    ) -> StrategySelection {
        tracing::info!(
            run_id = %analysis.run_id,
            strategy = strategy.as_str(),
            source = source.as_str(),
            %reason,
            "fix strategy selected"
        );
        StrategySelection {
            strategy,
            source,
            reason,
        }
    }
}
