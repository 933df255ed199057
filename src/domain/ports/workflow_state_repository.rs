//! Workflow state repository port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::WorkflowState;

/// Persistence for run state, partitioned by run id.
#[async_trait]
pub trait WorkflowStateRepository: Send + Sync {
    /// Insert a new run. Returns `false` when the run id already exists.
    async fn insert(&self, state: &WorkflowState) -> DomainResult<bool>;

    /// Overwrite the persisted state of an existing run.
    async fn save(&self, state: &WorkflowState) -> DomainResult<()>;

    async fn get(&self, run_id: Uuid) -> DomainResult<Option<WorkflowState>>;

    /// All runs not yet in a terminal stage, oldest first.
    async fn list_incomplete(&self) -> DomainResult<Vec<WorkflowState>>;

    /// Most recently updated runs.
    async fn list_recent(&self, limit: usize) -> DomainResult<Vec<WorkflowState>>;
}
