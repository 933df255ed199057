//! Fix learning store: cross-run memory of which strategies fixed which failures.

use serde::Serialize;
use std::cmp::Ordering;
use std::sync::Arc;

use super::knowledge_graph::KnowledgeGraph;
use crate::domain::errors::DomainResult;
use crate::domain::models::{
    keyword_similarity, pattern_keywords, FixLearning, FixStrategy, LearningConfig,
    LearningQualifiers,
};
use crate::domain::ports::FixLearningRepository;

/// A learned fix for a pattern similar to the one queried.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarPattern {
    pub similarity: f64,
    pub learning: FixLearning,
}

/// Highest success rate first, more samples breaking ties.
fn by_success(a: &FixLearning, b: &FixLearning) -> Ordering {
    b.success_rate()
        .partial_cmp(&a.success_rate())
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.times_tried.cmp(&a.times_tried))
        .then_with(|| a.fix_strategy.cmp(&b.fix_strategy))
}

pub struct FixLearningStore {
    repository: Arc<dyn FixLearningRepository>,
    config: LearningConfig,
}

impl FixLearningStore {
    pub fn new(repository: Arc<dyn FixLearningRepository>, config: LearningConfig) -> Self {
        Self { repository, config }
    }

    pub fn config(&self) -> &LearningConfig {
        &self.config
    }

    fn is_reliable(&self, learning: &FixLearning) -> bool {
        learning.is_reliable(self.config.reliability_threshold, self.config.min_samples)
    }

    /// Count one attempt of `strategy` against `failure_pattern`.
    pub async fn record(
        &self,
        failure_pattern: &str,
        strategy: FixStrategy,
        success: bool,
        qualifiers: &LearningQualifiers,
    ) -> DomainResult<FixLearning> {
        let learning = self
            .repository
            .record(failure_pattern, strategy, success, qualifiers)
            .await?;
        tracing::debug!(
            pattern = failure_pattern,
            strategy = strategy.as_str(),
            success,
            tried = learning.times_tried,
            succeeded = learning.times_succeeded,
            "fix outcome recorded"
        );
        Ok(learning)
    }

    /// Reliable fixes for other patterns that share enough keywords with `failure_pattern`.
    pub async fn similar_patterns(&self, failure_pattern: &str) -> DomainResult<Vec<SimilarPattern>> {
        let keywords = pattern_keywords(failure_pattern);
        let mut similar: Vec<SimilarPattern> = self
            .repository
            .list_all()
            .await?
            .into_iter()
            .filter(|l| l.failure_pattern != failure_pattern && self.is_reliable(l))
            .filter_map(|learning| {
                let similarity = keyword_similarity(&keywords, &learning.keywords());
                (similarity >= self.config.similarity_threshold).then_some(SimilarPattern {
                    similarity,
                    learning,
                })
            })
            .collect();

        similar.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(Ordering::Equal)
                .then_with(|| by_success(&a.learning, &b.learning))
        });
        Ok(similar)
    }

    /// Reliable fixes for `failure_pattern`, best first.
    ///
    /// Exact matches come first; near matches are only consulted when the
    /// pattern has no reliable exact entry.
    pub async fn reliable_fixes(&self, failure_pattern: &str) -> DomainResult<Vec<FixLearning>> {
        let mut exact: Vec<FixLearning> = self
            .repository
            .list_for_pattern(failure_pattern)
            .await?
            .into_iter()
            .filter(|l| self.is_reliable(l))
            .collect();
        if !exact.is_empty() {
            exact.sort_by(by_success);
            return Ok(exact);
        }

        Ok(self
            .similar_patterns(failure_pattern)
            .await?
            .into_iter()
            .map(|s| s.learning)
            .collect())
    }

    /// Highest-success-rate fix for an exact or near-match pattern.
    pub async fn best_fix(&self, failure_pattern: &str) -> DomainResult<Option<FixLearning>> {
        let exact = self
            .repository
            .list_for_pattern(failure_pattern)
            .await?
            .into_iter()
            .filter(|l| l.times_tried >= self.config.min_samples && l.times_succeeded > 0)
            .min_by(by_success);
        if exact.is_some() {
            return Ok(exact);
        }
        Ok(self
            .similar_patterns(failure_pattern)
            .await?
            .into_iter()
            .next()
            .map(|s| s.learning))
    }

    pub async fn list_all(&self) -> DomainResult<Vec<FixLearning>> {
        self.repository.list_all().await
    }

    /// Graph projection of everything learned so far.
    pub async fn graph(&self) -> DomainResult<KnowledgeGraph> {
        Ok(KnowledgeGraph::from_learnings(&self.repository.list_all().await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteFixLearningRepository};

    async fn setup_store() -> FixLearningStore {
        let pool = create_migrated_test_pool().await.unwrap();
        FixLearningStore::new(
            Arc::new(SqliteFixLearningRepository::new(pool)),
            LearningConfig::default(),
        )
    }

    async fn record_n(store: &FixLearningStore, pattern: &str, strategy: FixStrategy, ok: u32, failed: u32) {
        let none = LearningQualifiers::default();
        for _ in 0..ok {
            store.record(pattern, strategy, true, &none).await.unwrap();
        }
        for _ in 0..failed {
            store.record(pattern, strategy, false, &none).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_best_fix_prefers_highest_success_rate() {
        let store = setup_store().await;
        let pattern = "cannot find module <str>";
        record_n(&store, pattern, FixStrategy::DependencyAdd, 1, 3).await;
        record_n(&store, pattern, FixStrategy::ImportFix, 4, 1).await;

        let best = store.best_fix(pattern).await.unwrap().unwrap();
        assert_eq!(best.fix_strategy, FixStrategy::ImportFix);
        assert_eq!(best.times_tried, 5);
    }

    #[tokio::test]
    async fn test_reliable_fixes_require_threshold() {
        let store = setup_store().await;
        let pattern = "timeout of <num>ms exceeded";
        record_n(&store, pattern, FixStrategy::TimeoutIncrease, 7, 3).await;
        assert!(store.reliable_fixes(pattern).await.unwrap().is_empty());

        record_n(&store, pattern, FixStrategy::TimeoutIncrease, 1, 0).await;
        let fixes = store.reliable_fixes(pattern).await.unwrap();
        assert_eq!(fixes.len(), 1);
        assert!(fixes[0].success_rate() > 0.7);
    }

    #[tokio::test]
    async fn test_similar_patterns_by_keyword_overlap() {
        let store = setup_store().await;
        record_n(&store, "cannot find module <str> in <path>", FixStrategy::ImportFix, 3, 0).await;
        record_n(&store, "connection refused on port <num>", FixStrategy::ConfigFix, 3, 0).await;

        let similar = store.similar_patterns("cannot find module <str>").await.unwrap();
        assert_eq!(similar.len(), 1);
        assert_eq!(similar[0].learning.fix_strategy, FixStrategy::ImportFix);
        assert!(similar[0].similarity >= 0.5);

        let fixes = store.reliable_fixes("cannot find module <str>").await.unwrap();
        assert_eq!(fixes[0].fix_strategy, FixStrategy::ImportFix);
    }

    #[tokio::test]
    async fn test_unknown_pattern_has_no_best_fix() {
        let store = setup_store().await;
        assert!(store.best_fix("never seen").await.unwrap().is_none());
    }
}
