//! Common test utilities for integration tests
//!
//! Provides raw execution outputs, scripted backends and a fully wired
//! orchestrator over an in-memory database.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use verifix::adapters::artifacts::InMemoryArtifactStore;
use verifix::adapters::execution::{ExecutionScript, ScriptedBackend, ScriptedExecution};
use verifix::adapters::sqlite::{
    create_migrated_test_pool, SqliteFixLearningRepository, SqliteRunRecordRepository,
    SqliteWorkflowStateRepository,
};
use verifix::application::{OrchestratorDeps, TestOrchestrator};
use verifix::domain::errors::{DomainError, DomainResult};
use verifix::domain::models::{
    ArtifactContent, ArtifactPayload, AssertionCounts, ClaimKind, ClaimedAction, CodeHandle,
    Config, ExecutionKind, RawArtifact, RawExecutionOutput, RawOutcome, VerificationRequest,
    VerifierConfig, WorkflowState,
};
use verifix::domain::ports::{RunRecordRepository, WorkflowStateRepository};
use verifix::services::{FixLearningStore, IndependentVerifier, RootCauseAnalyzer};

pub const REVIEWER_ID: &str = "independent-reviewer";

/// Setup test logging
///
/// Initializes tracing subscriber for test output.
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Defaults with deadlines short enough for tests.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.max_concurrent_runs = 2;
    config.timeouts.execution_ms = 5_000;
    config.timeouts.detection_ms = 5_000;
    config.timeouts.verification_ms = 5_000;
    config.timeouts.diagnosis_ms = 5_000;
    config.timeouts.fix_application_ms = 5_000;
    config.verifier.reviewer_id = REVIEWER_ID.to_string();
    config
}

fn text_artifact(name: &str, payload: ArtifactPayload, text: String, at: chrono::DateTime<Utc>) -> RawArtifact {
    RawArtifact {
        name: name.to_string(),
        captured_at: at,
        payload,
        content: ArtifactContent::Text(text),
    }
}

fn raw(
    artifacts: impl FnOnce(chrono::DateTime<Utc>) -> Vec<RawArtifact>,
    outcome: RawOutcome,
) -> RawExecutionOutput {
    let started_at = Utc::now() - Duration::seconds(3);
    RawExecutionOutput {
        execution_kind: ExecutionKind::Programmatic,
        started_at,
        finished_at: started_at + Duration::milliseconds(2_500),
        artifacts: artifacts(started_at + Duration::seconds(1)),
        claims: vec![ClaimedAction::new(ClaimKind::RanTests, "ran the acceptance suite")],
        outcome: Some(outcome),
        crash_reason: None,
    }
}

/// A passing run whose trace, log and outcome agree. `tag` keeps artifact
/// bytes distinct between attempts.
pub fn clean_output(tag: &str) -> RawExecutionOutput {
    let counts = AssertionCounts::new(12, 12, 0);
    raw(
        |at| {
            vec![
                text_artifact(
                    "test-trace",
                    ArtifactPayload::Trace {
                        command: "npm test".to_string(),
                        exit_code: Some(0),
                        tests: Some(counts),
                        tool_refs: Vec::new(),
                    },
                    format!("[{tag}] $ npm test\nexit 0"),
                    at,
                ),
                text_artifact(
                    "test-log",
                    ArtifactPayload::Log {
                        source: "test-runner".to_string(),
                        line_count: 0,
                        reported_status: None,
                    },
                    format!("[{tag}] 12 tests passed"),
                    at,
                ),
            ]
        },
        RawOutcome {
            passed: true,
            duration_ms: Some(2_500),
            assertions: counts,
            coverage_percent: Some(81.0),
            explanation: None,
            error_message: None,
        },
    )
}

/// A failing run reporting `error`.
pub fn failing_output(tag: &str, error: &str) -> RawExecutionOutput {
    let counts = AssertionCounts::new(12, 10, 2);
    raw(
        |at| {
            vec![
                text_artifact(
                    "test-trace",
                    ArtifactPayload::Trace {
                        command: "npm test".to_string(),
                        exit_code: Some(1),
                        tests: Some(counts),
                        tool_refs: Vec::new(),
                    },
                    format!("[{tag}] $ npm test\n{error}\nexit 1"),
                    at,
                ),
                text_artifact(
                    "test-log",
                    ArtifactPayload::Log {
                        source: "test-runner".to_string(),
                        line_count: 0,
                        reported_status: None,
                    },
                    format!("[{tag}] 10 passed, 2 failed"),
                    at,
                ),
            ]
        },
        RawOutcome {
            passed: false,
            duration_ms: Some(2_500),
            assertions: counts,
            coverage_percent: Some(81.0),
            explanation: None,
            error_message: Some(error.to_string()),
        },
    )
}

/// Claims to have run the tests and reports a pass, but carries no trace.
pub fn unevidenced_output(tag: &str) -> RawExecutionOutput {
    raw(
        |at| {
            vec![text_artifact(
                "summary-log",
                ArtifactPayload::Log {
                    source: "agent".to_string(),
                    line_count: 0,
                    reported_status: None,
                },
                format!("[{tag}] all tests passed"),
                at,
            )]
        },
        RawOutcome {
            passed: true,
            duration_ms: Some(2_500),
            assertions: AssertionCounts::new(12, 12, 0),
            coverage_percent: None,
            explanation: None,
            error_message: None,
        },
    )
}

pub fn script(outputs: Vec<RawExecutionOutput>) -> ExecutionScript {
    ExecutionScript::new(outputs.into_iter().map(ScriptedExecution::Output).collect())
}

pub fn request(target: &str) -> VerificationRequest {
    VerificationRequest::new(
        Uuid::new_v4(),
        CodeHandle::new(target),
        vec!["all acceptance tests pass".to_string()],
    )
}

/// Workflow state store whose saves can be made to fail.
pub struct FlakyStates {
    inner: Arc<dyn WorkflowStateRepository>,
    fail_saves: AtomicBool,
}

impl FlakyStates {
    pub fn new(inner: Arc<dyn WorkflowStateRepository>) -> Self {
        Self {
            inner,
            fail_saves: AtomicBool::new(false),
        }
    }

    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl WorkflowStateRepository for FlakyStates {
    async fn insert(&self, state: &WorkflowState) -> DomainResult<bool> {
        self.inner.insert(state).await
    }

    async fn save(&self, state: &WorkflowState) -> DomainResult<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(DomainError::DatabaseError("disk I/O error".to_string()));
        }
        self.inner.save(state).await
    }

    async fn get(&self, run_id: Uuid) -> DomainResult<Option<WorkflowState>> {
        self.inner.get(run_id).await
    }

    async fn list_incomplete(&self) -> DomainResult<Vec<WorkflowState>> {
        self.inner.list_incomplete().await
    }

    async fn list_recent(&self, limit: usize) -> DomainResult<Vec<WorkflowState>> {
        self.inner.list_recent(limit).await
    }
}

/// A wired orchestrator plus handles on everything behind it.
pub struct Harness {
    pub orchestrator: TestOrchestrator,
    pub backend: Arc<ScriptedBackend>,
    pub artifacts: Arc<InMemoryArtifactStore>,
    pub states: Arc<SqliteWorkflowStateRepository>,
    pub records: Arc<SqliteRunRecordRepository>,
    pub learning: Arc<FixLearningStore>,
}

impl Harness {
    pub async fn new(config: Config, script: ExecutionScript) -> Self {
        Self::with_deps(config, script, |deps| deps).await
    }

    /// Build a harness, letting the caller swap any adapter before wiring.
    pub async fn with_deps(
        config: Config,
        script: ExecutionScript,
        customize: impl FnOnce(OrchestratorDeps) -> OrchestratorDeps,
    ) -> Self {
        let pool = create_migrated_test_pool().await.expect("test pool");
        let backend = ScriptedBackend::shared(script);
        let artifacts = Arc::new(InMemoryArtifactStore::new());
        let states = Arc::new(SqliteWorkflowStateRepository::new(pool.clone()));
        let records = Arc::new(SqliteRunRecordRepository::new(pool.clone()));
        let verifier = IndependentVerifier::new(VerifierConfig {
            reviewer_id: REVIEWER_ID.to_string(),
            ..config.verifier.clone()
        })
        .with_store(artifacts.clone());

        let deps = customize(OrchestratorDeps {
            backend: backend.clone(),
            verifier: Arc::new(verifier),
            diagnoser: Arc::new(RootCauseAnalyzer::new()),
            artifacts: artifacts.clone(),
            states: states.clone(),
            records: records.clone(),
            learnings: Arc::new(SqliteFixLearningRepository::new(pool)),
        });
        let orchestrator = TestOrchestrator::new(config, deps).expect("orchestrator");
        let learning = orchestrator.learning();

        Self {
            orchestrator,
            backend,
            artifacts,
            states,
            records,
            learning,
        }
    }

    /// Start a run and wait for its driver to stop.
    pub async fn run(&self, request: VerificationRequest) -> WorkflowState {
        let run_id = request.run_id;
        self.orchestrator
            .start_verification(request)
            .await
            .expect("start");
        self.orchestrator.wait(run_id).await.expect("wait")
    }

    pub async fn fix_attempts(&self, run_id: Uuid) -> Vec<verifix::domain::models::FixAttempt> {
        self.records.list_fix_attempts(run_id).await.expect("fix attempts")
    }
}
