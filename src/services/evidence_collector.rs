//! Evidence collection: turn one execution's raw output into an immutable bundle.
//!
//! Every artifact is hashed and durably stored before the bundle exists. A
//! storage failure aborts the whole attempt; there are no partial bundles.

use regex::Regex;
use std::sync::{Arc, LazyLock};
use uuid::Uuid;

use super::builtin_regex;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    content_hash, ArtifactContent, ArtifactPayload, ArtifactRef, EvidenceBundle, OutcomeSummary, RawArtifact,
    RawExecutionOutput, ReportedStatus,
};
use crate::domain::ports::ArtifactStore;

static LOG_FAILED: LazyLock<Option<Regex>> = LazyLock::new(|| {
    builtin_regex(r"(?m)\b[1-9]\d*\s+(?:tests?\s+)?failed\b|\bFAIL(?:ED|URE)?\b|test result: FAILED")
});

static LOG_PASSED: LazyLock<Option<Regex>> = LazyLock::new(|| {
    builtin_regex(r"(?i)\ball tests passed\b|\b\d+\s+(?:tests?\s+)?passed\b|test result: ok\b|\bPASS(?:ED)?\b")
});

/// Parse the test status a log reports, if it reports one.
pub fn parse_reported_status(text: &str) -> Option<ReportedStatus> {
    if super::regex_matches(&LOG_FAILED, text) {
        Some(ReportedStatus::Failed)
    } else if super::regex_matches(&LOG_PASSED, text) {
        Some(ReportedStatus::Passed)
    } else {
        None
    }
}

pub struct EvidenceCollector {
    store: Arc<dyn ArtifactStore>,
}

impl EvidenceCollector {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self { store }
    }

    /// Build the evidence bundle for `attempt` of `run_id`.
    ///
    /// Fails closed with `UndeterminedOutcome` when the driver never reported
    /// an outcome, and with `ArtifactPersistence` when any artifact cannot be stored.
    pub async fn collect(
        &self,
        run_id: Uuid,
        attempt: u32,
        raw: RawExecutionOutput,
    ) -> DomainResult<EvidenceBundle> {
        let Some(outcome) = raw.outcome else {
            let reason = raw
                .crash_reason
                .unwrap_or_else(|| "execution finished without reporting an outcome".to_string());
            tracing::warn!(%run_id, attempt, %reason, "execution outcome undetermined");
            return Err(DomainError::UndeterminedOutcome {
                run_id,
                attempt,
                reason,
            });
        };

        let mut artifacts = Vec::with_capacity(raw.artifacts.len());
        for artifact in raw.artifacts {
            artifacts.push(self.persist(artifact).await?);
        }

        let measured_ms = (raw.finished_at - raw.started_at).num_milliseconds().max(0) as u64;
        let summary = OutcomeSummary {
            passed: outcome.passed,
            duration_ms: outcome.duration_ms.unwrap_or(measured_ms),
            assertions: outcome.assertions,
            coverage_percent: outcome.coverage_percent,
            explanation: outcome.explanation,
            error_message: outcome.error_message,
        };

        let bundle = EvidenceBundle::new(
            run_id,
            attempt,
            raw.execution_kind,
            raw.started_at,
            raw.finished_at,
            artifacts,
            raw.claims,
            summary,
        );

        tracing::info!(
            %run_id,
            attempt,
            artifacts = bundle.artifacts().len(),
            passed = bundle.outcome().passed,
            "evidence bundle collected"
        );
        Ok(bundle)
    }

    async fn persist(&self, artifact: RawArtifact) -> DomainResult<ArtifactRef> {
        let bytes = artifact.content.as_bytes();
        let hash = content_hash(bytes);

        let storage_path = self.store.put(&hash, bytes).await.map_err(|e| {
            tracing::error!(name = %artifact.name, error = %e, "artifact persistence failed");
            match e {
                DomainError::ArtifactPersistence { reason, .. } => DomainError::ArtifactPersistence {
                    name: artifact.name.clone(),
                    reason,
                },
                other => DomainError::ArtifactPersistence {
                    name: artifact.name.clone(),
                    reason: other.to_string(),
                },
            }
        })?;

        let payload = enrich_payload(artifact.payload, &artifact.content);

        Ok(ArtifactRef {
            name: artifact.name,
            content_hash: hash,
            storage_path,
            size_bytes: bytes.len() as u64,
            captured_at: artifact.captured_at,
            payload,
        })
    }
}

/// Fill in log metadata the driver left blank, derived from the log text itself.
fn enrich_payload(payload: ArtifactPayload, content: &ArtifactContent) -> ArtifactPayload {
    match (payload, content) {
        (
            ArtifactPayload::Log {
                source,
                line_count,
                reported_status,
            },
            ArtifactContent::Text(text),
        ) => ArtifactPayload::Log {
            source,
            line_count: if line_count == 0 {
                text.lines().count() as u32
            } else {
                line_count
            },
            reported_status: reported_status.or_else(|| parse_reported_status(text)),
        },
        (payload, _) => payload,
    }
}
