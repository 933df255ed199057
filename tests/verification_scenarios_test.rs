//! End-to-end verification runs against a scripted backend.

mod common;

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use common::*;
use verifix::adapters::execution::ScriptedFix;
use verifix::domain::errors::DomainResult;
use verifix::domain::models::{
    EvidenceBundle, FixStrategy, Recommendation, RedFlag, RedFlagCategory, RunStatus, Severity,
    Stage, StartOutcome, VerificationReport,
};
use verifix::domain::ports::{EvidenceVerifier, RunRecordRepository};

fn visited(state: &verifix::domain::models::WorkflowState) -> Vec<Stage> {
    state.stage_results.iter().map(|s| s.stage).collect()
}

#[tokio::test]
async fn test_clean_run_is_accepted_first_time() {
    setup_test_logging();
    let harness = Harness::new(test_config(), script(vec![clean_output("a1")])).await;
    let request = request("rev-1");
    let run_id = request.run_id;

    let state = harness.run(request).await;

    assert_eq!(state.stage, Stage::Completed);
    assert_eq!(state.status, RunStatus::Completed);
    assert_eq!(state.retry_count, 0);
    assert_eq!(state.execution_attempt, 1);
    assert_eq!(
        visited(&state),
        vec![
            Stage::Executing,
            Stage::EvidenceCollected,
            Stage::RedFlagChecked,
            Stage::Verifying,
            Stage::Accepted,
            Stage::Completed,
        ]
    );

    let report = harness.orchestrator.get_report(run_id).await.unwrap();
    assert!(report.red_flags.is_empty());
    assert!(report.fix_attempts.is_empty());
    assert!(report.root_cause.is_none());
    let verification = report.verification.expect("verification report");
    assert_eq!(verification.recommendation, Recommendation::Accept);
    assert_eq!(verification.confidence, 100);
    assert_eq!(verification.reviewer_id, REVIEWER_ID);
    assert_eq!(harness.artifacts.len().await, 2);
}

#[tokio::test]
async fn test_unevidenced_claim_is_rejected_then_fixed() {
    let harness = Harness::new(
        test_config(),
        script(vec![unevidenced_output("b1"), clean_output("b2")]),
    )
    .await;
    let request = request("rev-2");
    let run_id = request.run_id;

    let state = harness.run(request).await;
    assert_eq!(state.stage, Stage::Completed);
    assert_eq!(state.execution_attempt, 2);
    assert_eq!(state.retry_count, 1);

    let first_flags = harness.records.get_red_flags(run_id, 1).await.unwrap().unwrap();
    assert!(first_flags
        .iter()
        .any(|f| f.category == RedFlagCategory::MissingEvidence && f.severity == Severity::Critical));
    let first_report = harness.records.get_report(run_id, 1).await.unwrap().unwrap();
    assert_eq!(first_report.recommendation, Recommendation::Reject);

    let root_cause = harness.records.get_root_cause(run_id, 1).await.unwrap().unwrap();
    let attempts = harness.fix_attempts(run_id).await;
    assert_eq!(attempts.len(), 1);
    assert!(attempts[0].success);
    assert_eq!(attempts[0].tier_index, 0);
    assert_eq!(attempts[0].failure_pattern, root_cause.failure_pattern);

    let learned = harness
        .learning
        .list_all()
        .await
        .unwrap()
        .into_iter()
        .find(|l| l.fix_strategy == attempts[0].strategy)
        .expect("learning entry");
    assert_eq!((learned.times_tried, learned.times_succeeded), (1, 1));
}

#[tokio::test]
async fn test_persistent_failure_escalates_after_three_tiers() {
    let harness = Harness::new(
        test_config(),
        script(vec![
            failing_output("c1", "Cannot find module 'x'"),
            failing_output("c2", "Cannot find module 'x'"),
            failing_output("c3", "Cannot find module 'x'"),
            failing_output("c4", "Cannot find module 'x'"),
        ]),
    )
    .await;
    let request = request("rev-3");
    let run_id = request.run_id;

    let state = harness.run(request).await;
    assert_eq!(state.stage, Stage::Escalated);
    assert_eq!(state.status, RunStatus::Escalated);
    assert_eq!(state.retry_count, 3);
    assert!(state.reason.as_deref().unwrap_or("").contains("retry ceiling of 3"));
    assert!((state.cumulative_cost - 24.0).abs() < 1e-9);
    assert_eq!(harness.backend.executions_for(run_id).await, 4);

    let attempts = harness.fix_attempts(run_id).await;
    assert_eq!(attempts.len(), 3);
    assert!(attempts.iter().all(|a| !a.success));
    assert_eq!(
        attempts.iter().map(|a| a.tier_index).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    assert_eq!(attempts[0].strategy, FixStrategy::ImportFix);
    let distinct: HashSet<_> = attempts.iter().map(|a| a.strategy).collect();
    assert_eq!(distinct.len(), 3, "a failed strategy must not be retried");

    let tiers: Vec<String> = harness
        .backend
        .fix_requests()
        .await
        .into_iter()
        .map(|r| r.tier.name)
        .collect();
    assert_eq!(tiers, vec!["cheap", "balanced", "most_capable"]);

    let pattern = &attempts[0].failure_pattern;
    assert_eq!(pattern, "cannot find module <str>");
    for learning in harness.learning.list_all().await.unwrap() {
        assert_eq!(&learning.failure_pattern, pattern);
        assert_eq!((learning.times_tried, learning.times_succeeded), (1, 0));
    }
}

#[tokio::test]
async fn test_failed_fix_application_moves_to_next_tier() {
    let harness = Harness::new(
        test_config(),
        script(vec![
            failing_output("f1", "Cannot find module 'y'"),
            clean_output("f2"),
        ])
        .with_fixes(vec![ScriptedFix::failure("patch did not apply"), ScriptedFix::success()]),
    )
    .await;
    let request = request("rev-4");
    let run_id = request.run_id;

    let state = harness.run(request).await;
    assert_eq!(state.stage, Stage::Completed);

    let attempts = harness.fix_attempts(run_id).await;
    assert_eq!(attempts.len(), 2);
    assert!(!attempts[0].success);
    assert!(attempts[0]
        .error_message
        .as_deref()
        .is_some_and(|e| e.contains("patch did not apply")));
    assert!(attempts[1].success);
    assert_eq!(attempts[1].tier_index, 1);
    assert_ne!(attempts[0].strategy, attempts[1].strategy);
}

struct SlowVerifier;

#[async_trait]
impl EvidenceVerifier for SlowVerifier {
    fn reviewer_id(&self) -> &str {
        "slow-reviewer"
    }

    async fn verify(&self, _bundle: &EvidenceBundle, _flags: &[RedFlag]) -> DomainResult<VerificationReport> {
        tokio::time::sleep(Duration::from_millis(500)).await;
        Err(verifix::domain::errors::DomainError::ServiceUnavailable(
            "reviewer never answered".to_string(),
        ))
    }
}

#[tokio::test]
async fn test_verification_deadline_times_out_run() {
    let mut config = test_config();
    config.timeouts.verification_ms = 50;
    let harness = Harness::with_deps(config, script(vec![clean_output("d1")]), |mut deps| {
        deps.verifier = Arc::new(SlowVerifier);
        deps
    })
    .await;
    let request = request("rev-5");
    let run_id = request.run_id;

    let state = harness.run(request).await;
    assert_eq!(state.stage, Stage::TimedOut);
    assert_eq!(state.status, RunStatus::TimedOut);
    assert!(state.reason.as_deref().unwrap_or("").contains("verification"));
    assert!(!visited(&state).contains(&Stage::Diagnosing));

    let report = harness.orchestrator.get_report(run_id).await.unwrap();
    assert!(report.verification.is_none());
    assert!(report.root_cause.is_none());
    assert!(report.latest_bundle.is_some());
}

#[tokio::test]
async fn test_duplicate_request_does_not_start_second_run() {
    let harness = Harness::new(test_config(), script(vec![clean_output("e1")])).await;
    let request = request("rev-6");
    let run_id = request.run_id;

    let first = harness
        .orchestrator
        .start_verification(request.clone())
        .await
        .unwrap();
    let second = harness.orchestrator.start_verification(request).await.unwrap();
    assert_eq!(first, StartOutcome::Accepted);
    assert_eq!(second, StartOutcome::AlreadyExists);

    harness.orchestrator.wait(run_id).await.unwrap();
    assert_eq!(harness.backend.executions_for(run_id).await, 1);
}
