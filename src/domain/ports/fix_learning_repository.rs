//! Fix learning repository port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{FixLearning, FixStrategy, LearningQualifiers};

/// Persistent (failure pattern, strategy) counters shared by all runs.
#[async_trait]
pub trait FixLearningRepository: Send + Sync {
    /// Atomically increment the counters for one key and return the new row.
    ///
    /// Concurrent calls for the same key never lose an update.
    async fn record(
        &self,
        failure_pattern: &str,
        strategy: FixStrategy,
        success: bool,
        qualifiers: &LearningQualifiers,
    ) -> DomainResult<FixLearning>;

    async fn get(&self, failure_pattern: &str, strategy: FixStrategy) -> DomainResult<Option<FixLearning>>;

    async fn list_for_pattern(&self, failure_pattern: &str) -> DomainResult<Vec<FixLearning>>;

    async fn list_all(&self) -> DomainResult<Vec<FixLearning>>;
}
