//! Ports for the model-backed analysis calls (verification and diagnosis).

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    EvidenceBundle, FixAttempt, RedFlag, RootCauseAnalysis, VerificationReport,
};

/// Second, separately provisioned review of an evidence bundle.
#[async_trait]
pub trait EvidenceVerifier: Send + Sync {
    /// Identity of the reviewing process.
    fn reviewer_id(&self) -> &str;

    async fn verify(
        &self,
        bundle: &EvidenceBundle,
        flags: &[RedFlag],
    ) -> DomainResult<VerificationReport>;
}

/// Everything known about a failing attempt.
#[derive(Debug, Clone, Copy)]
pub struct DiagnosisInput<'a> {
    pub run_id: Uuid,
    pub attempt: u32,
    /// Absent when the execution failed before producing evidence.
    pub bundle: Option<&'a EvidenceBundle>,
    pub flags: &'a [RedFlag],
    pub report: Option<&'a VerificationReport>,
    pub history: &'a [FixAttempt],
    pub execution_error: Option<&'a str>,
}

/// Diagnoses why an attempt failed.
#[async_trait]
pub trait RootCauseDiagnoser: Send + Sync {
    async fn diagnose(&self, input: DiagnosisInput<'_>) -> DomainResult<RootCauseAnalysis>;
}
