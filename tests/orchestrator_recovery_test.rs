//! Stage retries, cancellation, crash recovery and persistence failures.

mod common;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use common::*;
use verifix::adapters::execution::{ExecutionScript, ScriptedExecution};
use verifix::domain::errors::{DomainError, DomainResult};
use verifix::domain::models::{
    EvidenceBundle, RedFlag, RunStatus, Stage, VerificationReport, WorkflowState,
};
use verifix::domain::ports::{EvidenceVerifier, RunRecordRepository, WorkflowStateRepository};
use verifix::services::EvidenceCollector;

struct PanickingVerifier;

#[async_trait]
impl EvidenceVerifier for PanickingVerifier {
    fn reviewer_id(&self) -> &str {
        "panicking-reviewer"
    }

    async fn verify(&self, _bundle: &EvidenceBundle, _flags: &[RedFlag]) -> DomainResult<VerificationReport> {
        panic!("reviewer crashed on malformed bundle");
    }
}

#[tokio::test]
async fn test_failed_execution_is_retried_once() {
    let script = ExecutionScript::new(vec![
        ScriptedExecution::Error("runner lost connection".to_string()),
        ScriptedExecution::Output(clean_output("r1")),
    ]);
    let harness = Harness::new(test_config(), script).await;
    let request = request("rev-10");
    let run_id = request.run_id;

    let state = harness.run(request).await;
    assert_eq!(state.stage, Stage::Completed);
    assert_eq!(harness.backend.executions_for(run_id).await, 2);
    assert!(harness.fix_attempts(run_id).await.is_empty());
}

#[tokio::test]
async fn test_crashed_driver_is_diagnosed_not_accepted() {
    let mut crashed = clean_output("r2");
    crashed.outcome = None;
    crashed.crash_reason = Some("browser process exited unexpectedly".to_string());
    let harness = Harness::new(test_config(), script(vec![crashed, clean_output("r3")])).await;
    let request = request("rev-11");
    let run_id = request.run_id;

    let state = harness.run(request).await;
    assert_eq!(state.stage, Stage::Completed);
    assert_eq!(state.execution_attempt, 2);
    assert!(harness.records.get_bundle(run_id, 1).await.unwrap().is_none());
    assert!(harness.records.get_root_cause(run_id, 1).await.unwrap().is_some());

    let attempts = harness.fix_attempts(run_id).await;
    assert_eq!(attempts.len(), 1);
    assert!(attempts[0].success);
}

#[tokio::test]
async fn test_artifact_store_failure_fails_run_without_bundle() {
    let harness = Harness::new(test_config(), script(vec![clean_output("r4")])).await;
    harness.artifacts.set_fail_writes(true);
    let request = request("rev-12");
    let run_id = request.run_id;

    let state = harness.run(request).await;
    assert_eq!(state.stage, Stage::Failed);
    assert!(state.error.is_some());
    assert!(harness.records.latest_bundle(run_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_cancel_stops_active_run() {
    let script = script(vec![clean_output("r5")]).with_delay(Duration::from_secs(10));
    let harness = Harness::new(test_config(), script).await;
    let request = request("rev-13");
    let run_id = request.run_id;

    harness.orchestrator.start_verification(request).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(harness.orchestrator.cancel(run_id, "operator request").await.unwrap());

    let state = harness.orchestrator.wait(run_id).await.unwrap();
    assert_eq!(state.stage, Stage::Failed);
    assert_eq!(state.reason.as_deref(), Some("cancelled: operator request"));
    assert_eq!(harness.orchestrator.stats().active, 0);

    assert!(!harness.orchestrator.cancel(run_id, "again").await.unwrap());
}

#[tokio::test]
async fn test_cancel_unknown_run_is_not_found() {
    let harness = Harness::new(test_config(), script(vec![clean_output("r6")])).await;
    let err = harness
        .orchestrator
        .cancel(uuid::Uuid::new_v4(), "nothing to cancel")
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::RunNotFound(_)));
}

#[tokio::test]
async fn test_resume_continues_from_saved_stage() {
    let harness = Harness::new(test_config(), script(vec![clean_output("never-run")])).await;
    let request = request("rev-14");
    let run_id = request.run_id;

    // State as a previous process left it: evidence stored, nothing checked yet.
    let bundle = EvidenceCollector::new(harness.artifacts.clone())
        .collect(run_id, 1, clean_output("r7"))
        .await
        .unwrap();
    let mut state = WorkflowState::new(&request);
    state.execution_attempt = 1;
    state.transition(Stage::Executing, "executing").unwrap();
    state.transition(Stage::EvidenceCollected, "collected").unwrap();
    assert!(harness.states.insert(&state).await.unwrap());
    harness.records.save_bundle(&bundle).await.unwrap();

    let resumed = harness.orchestrator.resume_incomplete().await.unwrap();
    assert_eq!(resumed, vec![run_id]);

    let state = harness.orchestrator.wait(run_id).await.unwrap();
    assert_eq!(state.stage, Stage::Completed);
    assert_eq!(harness.backend.executions_for(run_id).await, 0);
    assert!(harness.records.get_report(run_id, 1).await.unwrap().is_some());
}

#[tokio::test]
async fn test_state_write_failure_halts_intake() {
    let mut flaky = None;
    let harness = Harness::with_deps(test_config(), script(vec![clean_output("r8")]), |mut deps| {
        let states = Arc::new(FlakyStates::new(deps.states.clone()));
        flaky = Some(states.clone());
        deps.states = states;
        deps
    })
    .await;
    let flaky = flaky.expect("flaky store installed");
    flaky.set_fail_saves(true);

    let request = request("rev-15");
    let run_id = request.run_id;
    let state = harness.run(request).await;

    assert_eq!(state.stage, Stage::Pending);
    assert!(!harness.orchestrator.is_accepting());
    assert_eq!(harness.backend.executions_for(run_id).await, 0);

    let err = harness
        .orchestrator
        .start_verification(common::request("rev-16"))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::ServiceUnavailable(_)));
}

#[tokio::test]
async fn test_panicking_stage_fails_run_with_reason() {
    let harness = Harness::with_deps(test_config(), script(vec![clean_output("r9")]), |mut deps| {
        deps.verifier = Arc::new(PanickingVerifier);
        deps
    })
    .await;
    let request = request("rev-17");
    let run_id = request.run_id;

    let state = harness.run(request).await;
    assert_eq!(state.stage, Stage::Failed);
    assert_eq!(state.status, RunStatus::Failed);
    assert_eq!(
        state.reason.as_deref(),
        Some("run driver panicked: reviewer crashed on malformed bundle")
    );
    assert!(state.ended_at.is_some());
    assert_eq!(harness.orchestrator.stats().active, 0);
    assert_eq!(harness.orchestrator.active_runs().await, 0);

    let stored = harness.states.get(run_id).await.unwrap().unwrap();
    assert_eq!(stored.stage, Stage::Failed);
    assert!(harness.orchestrator.is_accepting());
}

#[tokio::test]
async fn test_finished_runs_are_released_without_wait() {
    let harness = Harness::new(test_config(), script(vec![clean_output("r10")])).await;

    let mut run_ids = Vec::new();
    for tag in ["rev-18", "rev-19", "rev-20"] {
        let request = request(tag);
        run_ids.push(request.run_id);
        harness.orchestrator.start_verification(request).await.unwrap();
    }

    tokio::time::timeout(Duration::from_secs(5), async {
        while harness.orchestrator.active_runs().await > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("runs should finish and unregister");

    for run_id in run_ids {
        let state = harness.orchestrator.get_status(run_id).await.unwrap();
        assert_eq!(state.stage, Stage::Completed);
        assert_eq!(harness.orchestrator.wait(run_id).await.unwrap().stage, Stage::Completed);
    }
}
