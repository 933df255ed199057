//! Repository port for the per-attempt records of a run.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    EvidenceBundle, FixAttempt, FixLearning, LearningQualifiers, RedFlag, RootCauseAnalysis,
    VerificationReport,
};

/// Evidence, red flags, reports, diagnoses and the fix attempt log.
///
/// Every record is write-once: a second write for the same key fails with
/// `DomainError::ImmutableRecord`, except red flags which are first-write-wins.
/// An attempt's red flag set is stored together with a completion marker, so
/// "checked with zero flags" and "not checked yet" stay distinguishable.
#[async_trait]
pub trait RunRecordRepository: Send + Sync {
    // -- Evidence --

    async fn save_bundle(&self, bundle: &EvidenceBundle) -> DomainResult<()>;

    async fn get_bundle(&self, run_id: Uuid, attempt: u32) -> DomainResult<Option<EvidenceBundle>>;

    async fn latest_bundle(&self, run_id: Uuid) -> DomainResult<Option<EvidenceBundle>>;

    // -- Red flags --

    /// Store the flag set for an attempt. A no-op when flags were already stored.
    async fn save_red_flags(&self, run_id: Uuid, attempt: u32, flags: &[RedFlag]) -> DomainResult<()>;

    /// `None` when detection has not completed for this attempt.
    async fn get_red_flags(&self, run_id: Uuid, attempt: u32) -> DomainResult<Option<Vec<RedFlag>>>;

    // -- Verification --

    async fn save_report(&self, report: &VerificationReport) -> DomainResult<()>;

    async fn get_report(&self, run_id: Uuid, attempt: u32) -> DomainResult<Option<VerificationReport>>;

    async fn latest_report(&self, run_id: Uuid) -> DomainResult<Option<VerificationReport>>;

    // -- Root cause --

    async fn save_root_cause(&self, analysis: &RootCauseAnalysis) -> DomainResult<()>;

    async fn get_root_cause(
        &self,
        run_id: Uuid,
        attempt: u32,
    ) -> DomainResult<Option<RootCauseAnalysis>>;

    async fn latest_root_cause(&self, run_id: Uuid) -> DomainResult<Option<RootCauseAnalysis>>;

    // -- Fix attempts --

    async fn append_fix_attempt(&self, attempt: &FixAttempt) -> DomainResult<()>;

    /// Append `attempt` and count its outcome in the learning counters as one
    /// transaction, returning the updated learning row.
    ///
    /// When the attempt is already logged this fails with `ImmutableRecord`
    /// and the counters are left untouched.
    async fn close_fix_attempt(
        &self,
        attempt: &FixAttempt,
        qualifiers: &LearningQualifiers,
    ) -> DomainResult<FixLearning>;

    /// Fix attempts of a run in attempt order.
    async fn list_fix_attempts(&self, run_id: Uuid) -> DomainResult<Vec<FixAttempt>>;
}
