//! Domain errors for the verification pipeline.

use thiserror::Error;
use uuid::Uuid;

/// Domain-level errors that can occur anywhere in the pipeline.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Run not found: {0}")]
    RunNotFound(Uuid),

    #[error("Run already exists: {0}")]
    RunAlreadyExists(Uuid),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition { from: String, to: String, reason: String },

    #[error("Execution outcome could not be determined for run {run_id} attempt {attempt}: {reason}")]
    UndeterminedOutcome { run_id: Uuid, attempt: u32, reason: String },

    #[error("Failed to persist artifact '{name}': {reason}")]
    ArtifactPersistence { name: String, reason: String },

    #[error("Record is immutable once written: {entity} {key}")]
    ImmutableRecord { entity: String, key: String },

    #[error("No more strategies available for failure pattern '{0}'")]
    StrategiesExhausted(String),

    #[error("Execution backend error: {0}")]
    ExecutionFailed(String),

    #[error("Verifier '{0}' is not independent from the executor")]
    VerifierNotIndependent(String),

    #[error("Stage '{stage}' exceeded its {timeout_ms}ms deadline")]
    StageTimeout { stage: String, timeout_ms: u64 },

    #[error("Run cancelled: {0}")]
    Cancelled(String),

    #[error("Service is not accepting new runs: {0}")]
    ServiceUnavailable(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}
