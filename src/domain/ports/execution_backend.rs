//! Execution backend port - the opaque handle that runs tests and applies fixes.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    CodeHandle, FixStrategy, ModelTier, RawExecutionOutput, RootCauseAnalysis,
};

/// A request to apply one fix strategy to the code under test.
#[derive(Debug, Clone)]
pub struct FixRequest {
    pub run_id: Uuid,
    pub attempt_number: u32,
    pub target: CodeHandle,
    pub strategy: FixStrategy,
    pub tier: ModelTier,
    pub root_cause: RootCauseAnalysis,
}

/// Backend that performs the actual test execution and fix application.
///
/// The orchestrator never interprets the code handle; it passes it back
/// and forth and treats both calls as success/failure plus payload.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Identity of the process that executes tests and reports results.
    fn executor_id(&self) -> &str;

    /// Run the acceptance test against `target` and return its raw output.
    async fn run_test(
        &self,
        run_id: Uuid,
        target: &CodeHandle,
        criteria: &[String],
    ) -> DomainResult<RawExecutionOutput>;

    /// Apply a fix and return the handle of the changed code.
    async fn apply_fix(&self, request: &FixRequest) -> DomainResult<CodeHandle>;
}
