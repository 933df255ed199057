//! Independent verification of an evidence bundle.
//!
//! Three passes feed one confidence score:
//! - integrity: artifacts are well-formed and actually present in the store
//! - cross-validation: independent artifacts agree with the reported outcome
//! - skeptical: red flags and uncorroborated claims pull the score down
//!
//! The skeptical pass weighs more as flag severity rises. The verifier never
//! sees the executor's reasoning, only the bundle and the flags.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    max_severity, validate_hash, ArtifactPayload, ArtifactRef, EvidenceBundle, EvidenceFinding, ExecutionKind,
    FindingVerdict, Recommendation, RedFlag, ReportedStatus, Severity, VerificationPass,
    VerificationReport, VerifierConfig,
};
use crate::domain::ports::{ArtifactStore, EvidenceVerifier};

const UNCORROBORATED_SCORE: f64 = 40.0;

pub struct IndependentVerifier {
    config: VerifierConfig,
    store: Option<Arc<dyn ArtifactStore>>,
}

impl IndependentVerifier {
    pub fn new(config: VerifierConfig) -> Self {
        Self { config, store: None }
    }

    /// Also confirm every referenced artifact is present in `store`.
    pub fn with_store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.store = Some(store);
        self
    }

    async fn integrity_pass(
        &self,
        bundle: &EvidenceBundle,
        findings: &mut Vec<EvidenceFinding>,
    ) -> DomainResult<f64> {
        let mut score = 100.0;

        if bundle.artifacts().is_empty() {
            score -= 60.0;
            findings.push(EvidenceFinding::new(
                VerificationPass::Integrity,
                FindingVerdict::Contradicts,
                "bundle contains no artifacts",
            ));
        }

        for artifact in bundle.artifacts() {
            let mut problems = Vec::new();
            if validate_hash(&artifact.content_hash).is_err() {
                score -= 40.0;
                problems.push("malformed content hash");
            }
            if artifact.size_bytes == 0 {
                score -= 15.0;
                problems.push("empty artifact");
            }
            if let Some(store) = &self.store {
                if problems.is_empty() && !store.exists(&artifact.content_hash).await? {
                    score -= 40.0;
                    problems.push("content missing from artifact store");
                }
            }

            let finding = if problems.is_empty() {
                EvidenceFinding::new(
                    VerificationPass::Integrity,
                    FindingVerdict::Supports,
                    format!("{} is intact", artifact.name),
                )
            } else {
                EvidenceFinding::new(
                    VerificationPass::Integrity,
                    FindingVerdict::Contradicts,
                    format!("{}: {}", artifact.name, problems.join(", ")),
                )
            };
            findings.push(finding.for_artifact(artifact.content_hash.clone()));
        }

        if bundle.finished_at() < bundle.started_at() {
            score -= 20.0;
            findings.push(EvidenceFinding::new(
                VerificationPass::Integrity,
                FindingVerdict::Contradicts,
                "execution window is inverted",
            ));
        }
        if !bundle.outcome().assertions.is_consistent() {
            score -= 25.0;
            findings.push(EvidenceFinding::new(
                VerificationPass::Integrity,
                FindingVerdict::Contradicts,
                "assertion counts do not add up",
            ));
        }

        Ok(clamp_score(score))
    }
}

/// Result of comparing every independent source against the reported outcome.
struct CrossValidation {
    score: f64,
    corroborated: bool,
    notes: Vec<String>,
}

/// What a single artifact says about whether the run passed, if anything.
fn implied_pass(artifact: &ArtifactRef, kind: ExecutionKind) -> Vec<(bool, String)> {
    match &artifact.payload {
        ArtifactPayload::Log {
            reported_status: Some(status),
            ..
        } => vec![(
            *status == ReportedStatus::Passed,
            format!("log '{}' reports {:?}", artifact.name, status),
        )],
        ArtifactPayload::Trace {
            command,
            exit_code,
            tests,
            ..
        } => {
            let mut out = Vec::new();
            let is_test_trace = tests.is_some() || command.to_lowercase().contains("test");
            if let (true, Some(code)) = (is_test_trace, exit_code) {
                out.push((*code == 0, format!("trace '{}' exited with {}", artifact.name, code)));
            }
            if let Some(counts) = tests.filter(|c| c.total > 0) {
                out.push((
                    counts.failed == 0,
                    format!(
                        "trace '{}' recorded {}/{} passing",
                        artifact.name, counts.passed, counts.total
                    ),
                ));
            }
            out
        }
        ArtifactPayload::NetworkTrace {
            method,
            url,
            status: Some(status),
        } if *status >= 500 || (*status < 400 && kind == ExecutionKind::Programmatic) => {
            vec![(*status < 400, format!("{method} {url} returned {status}"))]
        }
        // Screenshots and DOM snapshots show a page was reached, not that anything passed.
        _ => Vec::new(),
    }
}

fn cross_validation_pass(bundle: &EvidenceBundle, findings: &mut Vec<EvidenceFinding>) -> CrossValidation {
    let reported = bundle.outcome().passed;
    let mut supports = 0usize;
    let mut contradicts = 0usize;

    for artifact in bundle.artifacts() {
        for (passed, note) in implied_pass(artifact, bundle.execution_kind()) {
            let verdict = if passed == reported {
                supports += 1;
                FindingVerdict::Supports
            } else {
                contradicts += 1;
                FindingVerdict::Contradicts
            };
            findings.push(
                EvidenceFinding::new(VerificationPass::CrossValidation, verdict, note)
                    .for_artifact(artifact.content_hash.clone()),
            );
        }
    }

    let sources = supports + contradicts;
    if sources == 0 {
        return CrossValidation {
            score: UNCORROBORATED_SCORE,
            corroborated: false,
            notes: vec!["no independent artifact corroborates the reported outcome".to_string()],
        };
    }

    let mut notes = vec![format!(
        "{supports} of {sources} independent sources agree with the reported {}",
        if reported { "pass" } else { "failure" }
    )];
    if contradicts > 0 {
        notes.push(format!("{contradicts} sources contradict the reported outcome"));
    }

    CrossValidation {
        score: 100.0 * supports as f64 / sources as f64,
        corroborated: supports > 0,
        notes,
    }
}

fn skeptical_pass(
    bundle: &EvidenceBundle,
    flags: &[RedFlag],
    corroborated: bool,
    findings: &mut Vec<EvidenceFinding>,
) -> f64 {
    let mut score = 100.0;

    for flag in flags {
        score -= match flag.severity {
            Severity::Critical => 100.0,
            Severity::High => 35.0,
            Severity::Medium => 15.0,
            Severity::Low => 5.0,
        };
        let mut finding = EvidenceFinding::new(
            VerificationPass::Skeptical,
            FindingVerdict::Contradicts,
            format!("[{}] {}", flag.severity.as_str(), flag.description),
        );
        if let Some(hash) = flag.artifact_refs.first() {
            finding = finding.for_artifact(hash.clone());
        }
        findings.push(finding);
    }

    if !corroborated {
        score -= 20.0;
    }

    let outcome = bundle.outcome();
    if outcome.passed && outcome.assertions.total == 0 && !corroborated {
        score -= 10.0;
        findings.push(EvidenceFinding::new(
            VerificationPass::Skeptical,
            FindingVerdict::Neutral,
            "pass reported without any assertions",
        ));
    }

    clamp_score(score)
}

/// Weight of the skeptical pass for the worst flag present.
fn skeptical_weight(worst: Option<Severity>) -> f64 {
    match worst {
        None => 0.2,
        Some(Severity::Low) => 0.25,
        Some(Severity::Medium) => 0.35,
        Some(Severity::High) => 0.5,
        Some(Severity::Critical) => 0.6,
    }
}

pub fn weighted_confidence(integrity: f64, cross_validation: f64, skeptical: f64, worst: Option<Severity>) -> u8 {
    let skeptical_w = skeptical_weight(worst);
    let other_w = (1.0 - skeptical_w) / 2.0;
    let combined = integrity * other_w + cross_validation * other_w + skeptical * skeptical_w;
    combined.round().clamp(0.0, 100.0) as u8
}

/// Map a confidence score to a recommendation.
///
/// A failed outcome or any critical flag rejects regardless of score.
pub fn recommend(
    config: &VerifierConfig,
    confidence: u8,
    flags: &[RedFlag],
    outcome_passed: bool,
) -> Recommendation {
    if !outcome_passed || flags.iter().any(RedFlag::is_critical) {
        Recommendation::Reject
    } else if confidence >= config.accept_threshold {
        Recommendation::Accept
    } else if confidence < config.reject_threshold {
        Recommendation::Reject
    } else {
        Recommendation::Review
    }
}

fn clamp_score(score: f64) -> f64 {
    score.clamp(0.0, 100.0)
}

#[async_trait]
impl EvidenceVerifier for IndependentVerifier {
    fn reviewer_id(&self) -> &str {
        &self.config.reviewer_id
    }

    async fn verify(&self, bundle: &EvidenceBundle, flags: &[RedFlag]) -> DomainResult<VerificationReport> {
        let mut findings = Vec::new();

        let integrity = self.integrity_pass(bundle, &mut findings).await?;
        let cross = cross_validation_pass(bundle, &mut findings);
        let skeptical = skeptical_pass(bundle, flags, cross.corroborated, &mut findings);

        let confidence = weighted_confidence(integrity, cross.score, skeptical, max_severity(flags));
        let recommendation = recommend(&self.config, confidence, flags, bundle.outcome().passed);

        tracing::info!(
            run_id = %bundle.run_id(),
            attempt = bundle.attempt(),
            confidence,
            recommendation = recommendation.as_str(),
            integrity,
            cross_validation = cross.score,
            skeptical,
            "verification complete"
        );

        Ok(VerificationReport {
            id: Uuid::new_v4(),
            run_id: bundle.run_id(),
            attempt: bundle.attempt(),
            reviewer_id: self.config.reviewer_id.clone(),
            confidence,
            integrity_score: integrity,
            cross_validation_score: cross.score,
            skeptical_score: skeptical,
            recommendation,
            findings,
            cross_validation_notes: cross.notes,
            created_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::artifacts::InMemoryArtifactStore;
    use crate::domain::models::{AssertionCounts, ClaimKind, ClaimedAction, RedFlagCategory};
    use crate::services::test_support::*;

    fn verifier() -> IndependentVerifier {
        IndependentVerifier::new(VerifierConfig::default())
    }

    fn flag(run_id: Uuid, severity: Severity) -> RedFlag {
        RedFlag::new(run_id, 1, severity, RedFlagCategory::InconsistentEvidence, "mismatch")
    }

    #[test]
    fn test_recommendation_thresholds() {
        let config = VerifierConfig::default();
        assert_eq!(recommend(&config, 92, &[], true), Recommendation::Accept);
        assert_eq!(recommend(&config, 85, &[], true), Recommendation::Accept);
        assert_eq!(recommend(&config, 70, &[], true), Recommendation::Review);
        assert_eq!(recommend(&config, 49, &[], true), Recommendation::Reject);
    }

    #[test]
    fn test_critical_flag_rejects_regardless_of_score() {
        let config = VerifierConfig::default();
        let critical = flag(Uuid::new_v4(), Severity::Critical);
        assert_eq!(recommend(&config, 100, &[critical], true), Recommendation::Reject);
    }

    #[test]
    fn test_failed_outcome_always_rejects() {
        assert_eq!(
            recommend(&VerifierConfig::default(), 100, &[], false),
            Recommendation::Reject
        );
    }

    #[test]
    fn test_skeptical_weight_grows_with_severity() {
        let low = weighted_confidence(100.0, 100.0, 0.0, Some(Severity::Low));
        let high = weighted_confidence(100.0, 100.0, 0.0, Some(Severity::High));
        assert!(high < low);
        assert_eq!(weighted_confidence(100.0, 100.0, 100.0, None), 100);
    }

    #[tokio::test]
    async fn test_clean_bundle_is_accepted() {
        let bundle = clean_bundle(Uuid::new_v4(), 1);
        let report = verifier().verify(&bundle, &[]).await.unwrap();

        assert_eq!(report.recommendation, Recommendation::Accept);
        assert!(report.confidence >= 85);
        assert_eq!(report.reviewer_id, "verifix-reviewer");
        assert_eq!(report.contradictions().count(), 0);
    }

    #[tokio::test]
    async fn test_high_flags_drop_below_accept() {
        let run_id = Uuid::new_v4();
        let counts = AssertionCounts::new(3, 3, 0);
        let bundle = bundle(
            run_id,
            1,
            vec![test_trace("trace", 1, counts), test_log("log", ReportedStatus::Passed)],
            vec![ClaimedAction::new(ClaimKind::RanTests, "ran tests")],
            outcome(true, 2_000, counts),
        );
        let flags = vec![flag(run_id, Severity::High), flag(run_id, Severity::High)];

        let report = verifier().verify(&bundle, &flags).await.unwrap();
        assert!(!report.recommendation.is_accept());
        assert!(report.cross_validation_score < 100.0);
        assert!(report.contradictions().count() >= 3);
    }

    #[tokio::test]
    async fn test_uncorroborated_pass_is_not_accepted() {
        let bundle = bundle(
            Uuid::new_v4(),
            1,
            vec![],
            vec![],
            outcome(true, 2_000, AssertionCounts::default()),
        );
        let report = verifier().verify(&bundle, &[]).await.unwrap();

        assert_eq!(report.cross_validation_score, UNCORROBORATED_SCORE);
        assert!(!report.recommendation.is_accept());
    }

    #[tokio::test]
    async fn test_screenshot_alone_does_not_corroborate_interactive_pass() {
        let run_id = Uuid::new_v4();
        let shot = artifact(
            "dashboard.png",
            ArtifactPayload::Screenshot {
                width: 1280,
                height: 720,
                step: Some("dashboard".to_string()),
            },
        );
        let bundle = EvidenceBundle::new(
            run_id,
            1,
            ExecutionKind::Interactive,
            t0(),
            t0() + chrono::Duration::seconds(5),
            vec![shot],
            vec![ClaimedAction::new(ClaimKind::VisitedPage, "opened the dashboard")],
            outcome(true, 2_000, AssertionCounts::default()),
        );

        let report = verifier().verify(&bundle, &[]).await.unwrap();
        assert_eq!(report.cross_validation_score, UNCORROBORATED_SCORE);
        assert!(report
            .findings
            .iter()
            .any(|f| f.verdict == FindingVerdict::Neutral && f.note.contains("without any assertions")));
        assert!(report.confidence < 85);
        assert!(!report.recommendation.is_accept());
    }

    #[tokio::test]
    async fn test_artifact_missing_from_store_hurts_integrity() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let verifier = verifier().with_store(store);
        let report = verifier.verify(&clean_bundle(Uuid::new_v4(), 1), &[]).await.unwrap();

        assert_eq!(report.integrity_score, 20.0);
        assert!(!report.recommendation.is_accept());
    }
}
