//! Runs a single pipeline stage under its deadline.
//!
//! Errors are classified here, at the stage boundary, so the driver only ever
//! sees one of three outcomes: the stage failed, ran out of time, or was
//! cancelled.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use crate::domain::errors::DomainError;

#[derive(Debug, Error)]
pub enum StageError {
    #[error("{stage} failed: {source}")]
    Failed {
        stage: &'static str,
        #[source]
        source: DomainError,
    },

    #[error("{stage} exceeded its {timeout_ms} ms deadline")]
    TimedOut { stage: &'static str, timeout_ms: u64 },

    #[error("{stage} cancelled")]
    Cancelled { stage: &'static str },
}

impl From<StageError> for DomainError {
    fn from(err: StageError) -> Self {
        match err {
            StageError::Failed { source, .. } => source,
            StageError::TimedOut { stage, timeout_ms } => DomainError::StageTimeout {
                stage: stage.to_string(),
                timeout_ms,
            },
            StageError::Cancelled { stage } => DomainError::Cancelled(format!("during {stage}")),
        }
    }
}

/// Any error is worth one more try.
pub fn always(_: &DomainError) -> bool {
    true
}

/// Errors that stem from infrastructure rather than from the work itself.
pub fn transient(err: &DomainError) -> bool {
    matches!(
        err,
        DomainError::DatabaseError(_)
            | DomainError::ServiceUnavailable(_)
            | DomainError::ArtifactPersistence { .. }
    )
}

/// Deadline and retry policy shared by every stage.
#[derive(Debug, Clone, Copy)]
pub struct StageRunner {
    retries: u32,
}

impl StageRunner {
    pub fn new(retries: u32) -> Self {
        Self { retries }
    }

    /// Run `op` until it succeeds or the retry allowance is spent.
    ///
    /// Each try gets the full `timeout`. A timeout or cancellation ends the
    /// stage at once; only errors accepted by `retryable` are retried.
    pub async fn run<T, F, Fut>(
        &self,
        run_id: Uuid,
        stage: &'static str,
        timeout: Duration,
        cancel: &CancellationToken,
        retryable: fn(&DomainError) -> bool,
        mut op: F,
    ) -> Result<T, StageError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DomainError>>,
    {
        let mut tries = 0;
        loop {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(StageError::Cancelled { stage }),
                result = tokio::time::timeout(timeout, op()) => result,
            };

            match outcome {
                Err(_) => {
                    return Err(StageError::TimedOut {
                        stage,
                        timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    });
                }
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(source)) if tries < self.retries && retryable(&source) => {
                    tries += 1;
                    warn!(%run_id, stage, retry = tries, error = %source, "stage failed, retrying");
                }
                Ok(Err(source)) => return Err(StageError::Failed { stage, source }),
            }
        }
    }
}
