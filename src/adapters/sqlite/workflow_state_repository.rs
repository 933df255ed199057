//! SQLite implementation of the WorkflowStateRepository.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::WorkflowState;
use crate::domain::ports::WorkflowStateRepository;

#[derive(Clone)]
pub struct SqliteWorkflowStateRepository {
    pool: SqlitePool,
}

impl SqliteWorkflowStateRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WorkflowStateRepository for SqliteWorkflowStateRepository {
    async fn insert(&self, state: &WorkflowState) -> DomainResult<bool> {
        let state_json = serde_json::to_string(state)?;

        let result = sqlx::query(
            r#"INSERT INTO workflow_states (run_id, target, stage, status, execution_attempt, retry_count,
                   tier_index, cumulative_cost, reason, state_json, started_at, updated_at, ended_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(run_id) DO NOTHING"#,
        )
        .bind(state.run_id.to_string())
        .bind(state.target.as_str())
        .bind(state.stage.as_str())
        .bind(state.status.as_str())
        .bind(i64::from(state.execution_attempt))
        .bind(i64::from(state.retry_count))
        .bind(state.tier_index.map(|i| i as i64))
        .bind(state.cumulative_cost)
        .bind(state.reason.as_deref())
        .bind(&state_json)
        .bind(state.started_at.to_rfc3339())
        .bind(state.updated_at.to_rfc3339())
        .bind(state.ended_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn save(&self, state: &WorkflowState) -> DomainResult<()> {
        let state_json = serde_json::to_string(state)?;

        let result = sqlx::query(
            r#"UPDATE workflow_states SET target = ?, stage = ?, status = ?, execution_attempt = ?,
                   retry_count = ?, tier_index = ?, cumulative_cost = ?, reason = ?, state_json = ?,
                   updated_at = ?, ended_at = ?
               WHERE run_id = ?"#,
        )
        .bind(state.target.as_str())
        .bind(state.stage.as_str())
        .bind(state.status.as_str())
        .bind(i64::from(state.execution_attempt))
        .bind(i64::from(state.retry_count))
        .bind(state.tier_index.map(|i| i as i64))
        .bind(state.cumulative_cost)
        .bind(state.reason.as_deref())
        .bind(&state_json)
        .bind(state.updated_at.to_rfc3339())
        .bind(state.ended_at.map(|t| t.to_rfc3339()))
        .bind(state.run_id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::RunNotFound(state.run_id));
        }

        Ok(())
    }

    async fn get(&self, run_id: Uuid) -> DomainResult<Option<WorkflowState>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT state_json FROM workflow_states WHERE run_id = ?")
                .bind(run_id.to_string())
                .fetch_optional(&self.pool)
                .await?;

        row.map(|(json,)| serde_json::from_str(&json).map_err(DomainError::from))
            .transpose()
    }

    async fn list_incomplete(&self) -> DomainResult<Vec<WorkflowState>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT state_json FROM workflow_states WHERE status = 'running' ORDER BY started_at",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(json,)| serde_json::from_str(&json).map_err(DomainError::from))
            .collect()
    }

    async fn list_recent(&self, limit: usize) -> DomainResult<Vec<WorkflowState>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT state_json FROM workflow_states ORDER BY updated_at DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(json,)| serde_json::from_str(&json).map_err(DomainError::from))
            .collect()
    }
}
