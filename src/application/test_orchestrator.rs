//! Test orchestrator.
//!
//! Every verification run is an independent state machine driven by its own
//! task. Stages inside a run are strictly sequential; runs share nothing but
//! the learning store and the execution slots handed out by the
//! [`ResourceManager`].
//!
//! The workflow state is saved after every transition, and every stage output
//! (bundle, red flags, report, diagnosis) is stored under (run, attempt)
//! before the transition that follows it. A restarted service therefore
//! resumes each run from its last saved stage and reloads those records
//! instead of repeating the work.

use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{OwnedSemaphorePermit, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use super::resource_manager::{ResourceManager, SchedulerStats};
use super::stage_runner::{self, StageError, StageRunner};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Config, EvidenceBundle, FixAttempt, Recommendation, RootCauseAnalysis, RunReport, Stage,
    StartOutcome, VerificationRequest, WorkflowState,
};
use crate::domain::ports::{
    ArtifactStore, DiagnosisInput, EvidenceVerifier, ExecutionBackend, FixLearningRepository,
    FixRequest, RootCauseDiagnoser, RunRecordRepository, WorkflowStateRepository,
};
use crate::services::{
    EvidenceCollector, FixLearningStore, FixStrategySelector, RedFlagDetector, RetryDecision,
    RetryManager,
};

/// Adapters the orchestrator is wired to.
pub struct OrchestratorDeps {
    pub backend: Arc<dyn ExecutionBackend>,
    pub verifier: Arc<dyn EvidenceVerifier>,
    pub diagnoser: Arc<dyn RootCauseDiagnoser>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub states: Arc<dyn WorkflowStateRepository>,
    pub records: Arc<dyn RunRecordRepository>,
    pub learnings: Arc<dyn FixLearningRepository>,
}

struct RunControl {
    cancel: CancellationToken,
    reason: RwLock<Option<String>>,
    /// Fired once the driver has stopped and the run is unregistered.
    finished: CancellationToken,
}

impl RunControl {
    fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            reason: RwLock::new(None),
            finished: CancellationToken::new(),
        }
    }
}

enum DriveError {
    /// The run's state could not be saved; the driver stops immediately.
    Persistence(DomainError),
    Internal(DomainError),
}

impl From<DomainError> for DriveError {
    fn from(err: DomainError) -> Self {
        DriveError::Internal(err)
    }
}

type Step = Result<(), DriveError>;

/// Stages whose work loads the execution backend.
fn holds_slot(stage: Stage) -> bool {
    matches!(stage, Stage::Pending | Stage::Executing | Stage::FixApplying)
}

fn retry_execution(err: &DomainError) -> bool {
    matches!(err, DomainError::ExecutionFailed(_)) || stage_runner::transient(err)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// A duplicate write means the record was stored before a restart.
fn ignore_duplicate(result: DomainResult<()>) -> DomainResult<()> {
    match result {
        Err(DomainError::ImmutableRecord { .. }) => Ok(()),
        other => other,
    }
}

/// Assemble a run's trail: its state, latest evidence and that attempt's
/// flags, the latest report and diagnosis, and every fix attempt.
pub async fn load_report(
    states: &dyn WorkflowStateRepository,
    records: &dyn RunRecordRepository,
    run_id: Uuid,
) -> DomainResult<RunReport> {
    let state = states
        .get(run_id)
        .await?
        .ok_or(DomainError::RunNotFound(run_id))?;

    let latest_bundle = records.latest_bundle(run_id).await?;
    let red_flags = match &latest_bundle {
        Some(bundle) => records
            .get_red_flags(run_id, bundle.attempt())
            .await?
            .unwrap_or_default(),
        None => Vec::new(),
    };

    Ok(RunReport {
        state,
        verification: records.latest_report(run_id).await?,
        root_cause: records.latest_root_cause(run_id).await?,
        fix_attempts: records.list_fix_attempts(run_id).await?,
        latest_bundle,
        red_flags,
    })
}

struct Inner {
    config: Config,
    backend: Arc<dyn ExecutionBackend>,
    verifier: Arc<dyn EvidenceVerifier>,
    diagnoser: Arc<dyn RootCauseDiagnoser>,
    states: Arc<dyn WorkflowStateRepository>,
    records: Arc<dyn RunRecordRepository>,
    collector: EvidenceCollector,
    detector: RedFlagDetector,
    learning: Arc<FixLearningStore>,
    selector: FixStrategySelector,
    retry: RetryManager,
    resources: ResourceManager,
    stages: StageRunner,
    accepting: AtomicBool,
    runs: RwLock<HashMap<Uuid, Arc<RunControl>>>,
}

/// Entry point for starting, observing and cancelling verification runs.
#[derive(Clone)]
pub struct TestOrchestrator {
    inner: Arc<Inner>,
}

impl TestOrchestrator {
    /// Wire the pipeline.
    ///
    /// Fails with `VerifierNotIndependent` when the verifier reports the same
    /// identity as the process that executes the tests.
    pub fn new(config: Config, deps: OrchestratorDeps) -> DomainResult<Self> {
        let reviewer = deps.verifier.reviewer_id();
        if reviewer == deps.backend.executor_id() {
            error!(reviewer, "verifier shares its identity with the executor");
            return Err(DomainError::VerifierNotIndependent(reviewer.to_string()));
        }

        let learning = Arc::new(FixLearningStore::new(deps.learnings, config.learning.clone()));
        let inner = Inner {
            collector: EvidenceCollector::new(deps.artifacts),
            detector: RedFlagDetector::new(config.detector.clone()),
            selector: FixStrategySelector::new(learning.clone()),
            retry: RetryManager::new(config.retry.clone(), deps.records.clone()),
            resources: ResourceManager::new(config.max_concurrent_runs),
            stages: StageRunner::new(config.retry.stage_retries),
            learning,
            backend: deps.backend,
            verifier: deps.verifier,
            diagnoser: deps.diagnoser,
            states: deps.states,
            records: deps.records,
            accepting: AtomicBool::new(true),
            runs: RwLock::new(HashMap::new()),
            config,
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn learning(&self) -> Arc<FixLearningStore> {
        self.inner.learning.clone()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.inner.resources.stats()
    }

    /// Number of runs currently being driven.
    pub async fn active_runs(&self) -> usize {
        self.inner.runs.read().await.len()
    }

    /// False once a workflow state write has failed.
    pub fn is_accepting(&self) -> bool {
        self.inner.accepting.load(Ordering::SeqCst)
    }

    /// Register a run and start driving it in the background.
    pub async fn start_verification(&self, request: VerificationRequest) -> DomainResult<StartOutcome> {
        if !self.is_accepting() {
            return Err(DomainError::ServiceUnavailable(
                "workflow state cannot be persisted".to_string(),
            ));
        }

        let state = WorkflowState::new(&request);
        match self.inner.states.insert(&state).await {
            Ok(true) => {}
            Ok(false) => {
                info!(run_id = %request.run_id, "run already exists");
                return Ok(StartOutcome::AlreadyExists);
            }
            Err(e) => {
                self.inner.stop_accepting(&e);
                return Err(DomainError::ServiceUnavailable(e.to_string()));
            }
        }

        info!(
            run_id = %request.run_id,
            target = %request.target,
            criteria = request.criteria.len(),
            "verification run accepted"
        );
        self.spawn(state).await;
        Ok(StartOutcome::Accepted)
    }

    pub async fn get_status(&self, run_id: Uuid) -> DomainResult<WorkflowState> {
        self.inner
            .states
            .get(run_id)
            .await?
            .ok_or(DomainError::RunNotFound(run_id))
    }

    /// Everything recorded for a run, for human review.
    pub async fn get_report(&self, run_id: Uuid) -> DomainResult<RunReport> {
        load_report(self.inner.states.as_ref(), self.inner.records.as_ref(), run_id).await
    }

    /// Cancel an active run. Returns `false` when the run exists but is not
    /// being driven (already terminal).
    pub async fn cancel(&self, run_id: Uuid, reason: impl Into<String>) -> DomainResult<bool> {
        let control = self.inner.runs.read().await.get(&run_id).cloned();
        match control {
            Some(control) => {
                let reason = reason.into();
                info!(%run_id, %reason, "cancelling run");
                *control.reason.write().await = Some(reason);
                control.cancel.cancel();
                Ok(true)
            }
            None => {
                self.get_status(run_id).await?;
                Ok(false)
            }
        }
    }

    /// Re-spawn every persisted run that has not reached a terminal stage.
    pub async fn resume_incomplete(&self) -> DomainResult<Vec<Uuid>> {
        let mut resumed = Vec::new();
        for state in self.inner.states.list_incomplete().await? {
            if self.inner.runs.read().await.contains_key(&state.run_id) {
                continue;
            }
            info!(run_id = %state.run_id, stage = %state.stage, "resuming run");
            resumed.push(state.run_id);
            self.spawn(state).await;
        }
        Ok(resumed)
    }

    /// Wait for a run's driver to stop and return its final state.
    pub async fn wait(&self, run_id: Uuid) -> DomainResult<WorkflowState> {
        let control = self.inner.runs.read().await.get(&run_id).cloned();
        if let Some(control) = control {
            control.finished.cancelled().await;
        }
        self.get_status(run_id).await
    }

    async fn spawn(&self, state: WorkflowState) {
        let run_id = state.run_id;
        let control = Arc::new(RunControl::new());
        self.inner.runs.write().await.insert(run_id, control.clone());

        let inner = self.inner.clone();
        tokio::spawn(inner.supervise(state, control).instrument(info_span!("run", %run_id)));
    }
}

impl Inner {
    /// Drive a run to its end, then unregister it.
    ///
    /// A panic inside the driver ends the run as `Failed` with the panic
    /// message as its reason.
    async fn supervise(self: Arc<Self>, state: WorkflowState, control: Arc<RunControl>) {
        let run_id = state.run_id;
        let driven = AssertUnwindSafe(self.drive(state, &control)).catch_unwind().await;
        if let Err(payload) = driven {
            let message = panic_message(payload.as_ref());
            error!(%run_id, panic = %message, "run driver panicked");
            self.fail_after_panic(run_id, message).await;
        }

        self.runs.write().await.remove(&run_id);
        control.finished.cancel();
    }

    async fn fail_after_panic(&self, run_id: Uuid, message: String) {
        let mut state = match self.states.get(run_id).await {
            Ok(Some(state)) if !state.is_terminal() => state,
            Ok(_) => return,
            Err(e) => {
                error!(%run_id, error = %e, "could not reload run after panic");
                return;
            }
        };
        let reason = format!("run driver panicked: {message}");
        if self.close_pending(&mut state, &reason).await.is_err() {
            return;
        }
        if let Err(DriveError::Internal(e)) = self.finish(&mut state, Stage::Failed, reason, Some(message)).await {
            error!(%run_id, error = %e, "could not fail run after panic");
        }
    }

    async fn drive(&self, mut state: WorkflowState, control: &RunControl) {
        let run_id = state.run_id;
        let mut permit: Option<OwnedSemaphorePermit> = None;

        while !state.is_terminal() {
            if !holds_slot(state.stage) {
                permit = None;
            }
            match self.step(&mut state, &mut permit, control).await {
                Ok(()) => {}
                Err(DriveError::Persistence(e)) => {
                    error!(%run_id, stage = %state.stage, error = %e, "run halted: state could not be saved");
                    break;
                }
                Err(DriveError::Internal(e)) => {
                    error!(%run_id, stage = %state.stage, error = %e, "run failed");
                    if self
                        .finish(&mut state, Stage::Failed, "internal error", Some(e.to_string()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            }
        }

        drop(permit);
    }

    async fn step(
        &self,
        state: &mut WorkflowState,
        permit: &mut Option<OwnedSemaphorePermit>,
        control: &RunControl,
    ) -> Step {
        if control.cancel.is_cancelled() {
            let stage = state.stage.as_str();
            return self.stage_failed(state, control, StageError::Cancelled { stage }).await;
        }
        match state.stage {
            Stage::Pending => self.begin(state, permit, control).await,
            Stage::Executing => self.execute(state, permit, control).await,
            Stage::EvidenceCollected => self.check_red_flags(state, control).await,
            Stage::RedFlagChecked => {
                self.advance(state, Stage::Verifying, "independent verification started")
                    .await
            }
            Stage::Verifying => self.verify(state, control).await,
            Stage::Accepted => self.complete(state).await,
            Stage::Rejected => {
                self.advance(state, Stage::Diagnosing, "diagnosing rejected attempt")
                    .await
            }
            Stage::Diagnosing => self.diagnose(state, control).await,
            Stage::FixSelected => {
                let summary = match &state.pending_fix {
                    Some(fix) => format!("applying {} on tier '{}'", fix.strategy, fix.tier_name),
                    None => "applying fix".to_string(),
                };
                self.advance(state, Stage::FixApplying, summary).await
            }
            Stage::FixApplying => self.apply_fix(state, permit, control).await,
            Stage::Completed | Stage::Escalated | Stage::TimedOut | Stage::Failed => Ok(()),
        }
    }

    // -- Stages --

    async fn begin(
        &self,
        state: &mut WorkflowState,
        permit: &mut Option<OwnedSemaphorePermit>,
        control: &RunControl,
    ) -> Step {
        if let Err(e) = self.claim_slot(permit, control).await {
            return self.stage_failed(state, control, e).await;
        }
        state.execution_attempt += 1;
        let summary = format!("executing tests against {}", state.target);
        self.advance(state, Stage::Executing, summary).await
    }

    async fn execute(
        &self,
        state: &mut WorkflowState,
        permit: &mut Option<OwnedSemaphorePermit>,
        control: &RunControl,
    ) -> Step {
        let run_id = state.run_id;
        let attempt = state.execution_attempt;

        if let Some(bundle) = self.records.get_bundle(run_id, attempt).await? {
            *permit = None;
            let summary = format!("recovered bundle with {} artifacts", bundle.artifacts().len());
            return self.advance(state, Stage::EvidenceCollected, summary).await;
        }
        if let Err(e) = self.claim_slot(permit, control).await {
            return self.stage_failed(state, control, e).await;
        }

        let backend = &self.backend;
        let collector = &self.collector;
        let target = &state.target;
        let criteria = state.criteria.as_slice();
        let result = self
            .stages
            .run(
                run_id,
                "execution",
                self.config.timeouts.execution(),
                &control.cancel,
                retry_execution,
                move || async move {
                    let raw = backend.run_test(run_id, target, criteria).await?;
                    collector.collect(run_id, attempt, raw).await
                },
            )
            .await;
        *permit = None;

        match result {
            Ok(bundle) => {
                ignore_duplicate(self.records.save_bundle(&bundle).await)?;
                state.error = None;
                let summary = format!(
                    "{} artifacts, outcome {}",
                    bundle.artifacts().len(),
                    if bundle.outcome().passed { "passed" } else { "failed" }
                );
                self.advance(state, Stage::EvidenceCollected, summary).await
            }
            Err(StageError::Failed {
                source: source @ (DomainError::UndeterminedOutcome { .. } | DomainError::ExecutionFailed(_)),
                ..
            }) => {
                warn!(%run_id, attempt, error = %source, "execution produced no outcome, counting it as a failure");
                let summary = format!("execution failed: {source}");
                self.close_pending(state, &summary).await?;
                state.error = Some(source.to_string());
                self.advance(state, Stage::Diagnosing, summary).await
            }
            Err(e) => self.stage_failed(state, control, e).await,
        }
    }

    async fn check_red_flags(&self, state: &mut WorkflowState, control: &RunControl) -> Step {
        let run_id = state.run_id;
        let attempt = state.execution_attempt;
        let bundle = self.require_bundle(run_id, attempt).await?;

        let flags = match self.records.get_red_flags(run_id, attempt).await? {
            Some(flags) => flags,
            None => {
                let previous = self.previous_bundle(run_id, attempt).await?;
                let detector = &self.detector;
                let current = &bundle;
                let previous = previous.as_ref();
                let result = self
                    .stages
                    .run(
                        run_id,
                        "red flag detection",
                        self.config.timeouts.detection(),
                        &control.cancel,
                        stage_runner::always,
                        move || async move { Ok(detector.detect(current, previous)) },
                    )
                    .await;
                let flags = match result {
                    Ok(flags) => flags,
                    Err(e) => return self.stage_failed(state, control, e).await,
                };
                self.records.save_red_flags(run_id, attempt, &flags).await?;
                for flag in &flags {
                    warn!(
                        %run_id,
                        attempt,
                        severity = flag.severity.as_str(),
                        category = flag.category.as_str(),
                        description = %flag.description,
                        "red flag raised"
                    );
                }
                flags
            }
        };

        let critical = flags.iter().filter(|f| f.is_critical()).count();
        let summary = format!("{} red flags, {critical} critical", flags.len());
        self.advance(state, Stage::RedFlagChecked, summary).await
    }

    async fn verify(&self, state: &mut WorkflowState, control: &RunControl) -> Step {
        let run_id = state.run_id;
        let attempt = state.execution_attempt;
        let bundle = self.require_bundle(run_id, attempt).await?;
        let flags = self
            .records
            .get_red_flags(run_id, attempt)
            .await?
            .unwrap_or_default();

        let report = match self.records.get_report(run_id, attempt).await? {
            Some(report) => report,
            None => {
                let verifier = &self.verifier;
                let evidence = &bundle;
                let found = flags.as_slice();
                let result = self
                    .stages
                    .run(
                        run_id,
                        "verification",
                        self.config.timeouts.verification(),
                        &control.cancel,
                        stage_runner::always,
                        move || verifier.verify(evidence, found),
                    )
                    .await;
                let report = match result {
                    Ok(report) => report,
                    Err(e) => return self.stage_failed(state, control, e).await,
                };
                ignore_duplicate(self.records.save_report(&report).await)?;
                report
            }
        };

        let accepted = report.recommendation.is_accept();
        if let Some(pending) = state.pending_fix.take() {
            let error = (!accepted).then(|| {
                format!(
                    "verification returned {} with confidence {}",
                    report.recommendation.as_str(),
                    report.confidence
                )
            });
            self.retry
                .complete_attempt(run_id, &pending, accepted, error)
                .await?;
        }

        let summary = format!(
            "{} with confidence {} from {}",
            report.recommendation.as_str(),
            report.confidence,
            report.reviewer_id
        );
        if accepted {
            self.advance(state, Stage::Accepted, summary).await?;
            let reason = format!("accepted with confidence {}", report.confidence);
            return self.finish(state, Stage::Completed, reason, None).await;
        }

        if report.recommendation == Recommendation::Review {
            warn!(
                %run_id,
                attempt,
                confidence = report.confidence,
                "inconclusive verification treated as rejection, flagged for human review"
            );
        }
        self.advance(state, Stage::Rejected, summary).await
    }

    async fn complete(&self, state: &mut WorkflowState) -> Step {
        let report = self
            .records
            .get_report(state.run_id, state.execution_attempt)
            .await?;
        let reason = match report {
            Some(report) => format!("accepted with confidence {}", report.confidence),
            None => "accepted".to_string(),
        };
        self.finish(state, Stage::Completed, reason, None).await
    }

    async fn diagnose(&self, state: &mut WorkflowState, control: &RunControl) -> Step {
        let run_id = state.run_id;
        let attempt = state.execution_attempt;
        let history = self.records.list_fix_attempts(run_id).await?;

        let analysis = match self.records.get_root_cause(run_id, attempt).await? {
            Some(analysis) => analysis,
            None => {
                let bundle = self.records.get_bundle(run_id, attempt).await?;
                let flags = self
                    .records
                    .get_red_flags(run_id, attempt)
                    .await?
                    .unwrap_or_default();
                let report = self.records.get_report(run_id, attempt).await?;
                let execution_error = if bundle.is_none() { state.error.clone() } else { None };

                let input = DiagnosisInput {
                    run_id,
                    attempt,
                    bundle: bundle.as_ref(),
                    flags: &flags,
                    report: report.as_ref(),
                    history: &history,
                    execution_error: execution_error.as_deref(),
                };
                let diagnoser = &self.diagnoser;
                let result = self
                    .stages
                    .run(
                        run_id,
                        "diagnosis",
                        self.config.timeouts.diagnosis(),
                        &control.cancel,
                        stage_runner::always,
                        move || diagnoser.diagnose(input),
                    )
                    .await;
                let analysis = match result {
                    Ok(analysis) => analysis,
                    Err(e) => return self.stage_failed(state, control, e).await,
                };
                ignore_duplicate(self.records.save_root_cause(&analysis).await)?;
                info!(
                    %run_id,
                    attempt,
                    category = analysis.category.as_str(),
                    complexity = analysis.complexity.as_str(),
                    pattern = %analysis.failure_pattern,
                    "root cause diagnosed"
                );
                analysis
            }
        };

        self.plan_fix(state, &analysis, &history).await
    }

    /// Pick the next tier and strategy, or escalate.
    async fn plan_fix(
        &self,
        state: &mut WorkflowState,
        analysis: &RootCauseAnalysis,
        history: &[FixAttempt],
    ) -> Step {
        let plan = match self.retry.plan_next(state, analysis.complexity) {
            RetryDecision::Attempt(plan) => plan,
            RetryDecision::Escalate(reason) => {
                return self.finish(state, Stage::Escalated, reason, None).await;
            }
        };

        let selection = match self
            .selector
            .select(analysis, history, plan.tier_index, self.retry.tier_count())
            .await
        {
            Ok(selection) => selection,
            Err(DomainError::StrategiesExhausted(pattern)) => {
                let reason = format!("no untried fix strategy left for failure pattern '{pattern}'");
                return self.finish(state, Stage::Escalated, reason, None).await;
            }
            Err(e) => return Err(e.into()),
        };

        let summary = format!(
            "attempt {} on tier {} ('{}'): {} ({}, {})",
            plan.attempt_number,
            plan.tier_index + 1,
            plan.tier.name,
            selection.strategy,
            selection.source.as_str(),
            selection.reason
        );
        state.retry_count = plan.attempt_number;
        state.tier_index = Some(plan.tier_index);
        state.cumulative_cost += plan.tier.cost_per_attempt;
        state.pending_fix = Some(self.retry.pending_fix(&plan, &selection, analysis));
        self.advance(state, Stage::FixSelected, summary).await
    }

    async fn apply_fix(
        &self,
        state: &mut WorkflowState,
        permit: &mut Option<OwnedSemaphorePermit>,
        control: &RunControl,
    ) -> Step {
        let run_id = state.run_id;
        let pending = state.pending_fix.clone().ok_or_else(|| {
            DomainError::ValidationFailed("fix application without a selected fix".to_string())
        })?;
        let root_cause = self.records.latest_root_cause(run_id).await?.ok_or_else(|| {
            DomainError::ValidationFailed("fix application without a diagnosis".to_string())
        })?;
        let tier = self
            .config
            .retry
            .tiers
            .get(pending.tier_index)
            .cloned()
            .ok_or_else(|| {
                DomainError::ValidationFailed(format!("tier {} is not configured", pending.tier_index))
            })?;

        if let Err(e) = self.claim_slot(permit, control).await {
            return self.stage_failed(state, control, e).await;
        }

        let request = FixRequest {
            run_id,
            attempt_number: pending.attempt_number,
            target: state.target.clone(),
            strategy: pending.strategy,
            tier,
            root_cause,
        };
        let backend = &self.backend;
        let fix = &request;
        let result = self
            .stages
            .run(
                run_id,
                "fix application",
                self.config.timeouts.fix_application(),
                &control.cancel,
                stage_runner::transient,
                move || backend.apply_fix(fix),
            )
            .await;

        match result {
            Ok(target) => {
                info!(
                    %run_id,
                    attempt = pending.attempt_number,
                    strategy = pending.strategy.as_str(),
                    %target,
                    "fix applied"
                );
                let summary = format!("{} applied, re-running tests against {target}", pending.strategy);
                state.target = target;
                state.execution_attempt += 1;
                self.advance(state, Stage::Executing, summary).await
            }
            Err(StageError::Failed { source, .. }) => {
                *permit = None;
                warn!(%run_id, attempt = pending.attempt_number, error = %source, "fix application failed");
                state.pending_fix = None;
                self.retry
                    .complete_attempt(run_id, &pending, false, Some(source.to_string()))
                    .await?;
                let history = self.records.list_fix_attempts(run_id).await?;
                self.plan_fix(state, &request.root_cause, &history).await
            }
            Err(e) => {
                *permit = None;
                self.stage_failed(state, control, e).await
            }
        }
    }

    // -- Helpers --

    async fn claim_slot(
        &self,
        permit: &mut Option<OwnedSemaphorePermit>,
        control: &RunControl,
    ) -> Result<(), StageError> {
        if permit.is_none() {
            let acquired = self
                .resources
                .acquire(&control.cancel)
                .await
                .map_err(|e| match e {
                    DomainError::Cancelled(_) => StageError::Cancelled { stage: "scheduling" },
                    source => StageError::Failed {
                        stage: "scheduling",
                        source,
                    },
                })?;
            *permit = Some(acquired);
        }
        Ok(())
    }

    /// End the run according to how its stage failed.
    async fn stage_failed(&self, state: &mut WorkflowState, control: &RunControl, err: StageError) -> Step {
        match err {
            StageError::TimedOut { stage, timeout_ms } => {
                let reason = format!("{stage} exceeded its {timeout_ms} ms deadline");
                self.close_pending(state, &reason).await?;
                self.finish(state, Stage::TimedOut, reason, None).await
            }
            StageError::Cancelled { .. } => {
                let requested = control.reason.read().await.clone();
                let reason = format!(
                    "cancelled: {}",
                    requested.unwrap_or_else(|| "no reason given".to_string())
                );
                self.close_pending(state, &reason).await?;
                self.finish(state, Stage::Failed, reason, None).await
            }
            StageError::Failed { stage, source } => {
                let reason = format!("{stage} stage failed");
                self.close_pending(state, &reason).await?;
                self.finish(state, Stage::Failed, reason, Some(source.to_string()))
                    .await
            }
        }
    }

    /// Record an in-flight fix as failed when the run ends before it is verified.
    async fn close_pending(&self, state: &mut WorkflowState, error: &str) -> Step {
        if let Some(pending) = state.pending_fix.take() {
            self.retry
                .complete_attempt(state.run_id, &pending, false, Some(error.to_string()))
                .await?;
        }
        Ok(())
    }

    async fn require_bundle(&self, run_id: Uuid, attempt: u32) -> DomainResult<EvidenceBundle> {
        self.records
            .get_bundle(run_id, attempt)
            .await?
            .ok_or_else(|| {
                DomainError::ValidationFailed(format!("no evidence bundle for attempt {attempt}"))
            })
    }

    /// Most recent earlier attempt that produced evidence.
    async fn previous_bundle(&self, run_id: Uuid, attempt: u32) -> DomainResult<Option<EvidenceBundle>> {
        for earlier in (1..attempt).rev() {
            if let Some(bundle) = self.records.get_bundle(run_id, earlier).await? {
                return Ok(Some(bundle));
            }
        }
        Ok(None)
    }

    async fn advance(&self, state: &mut WorkflowState, next: Stage, summary: impl Into<String>) -> Step {
        let from = state.stage;
        state.transition(next, summary)?;
        self.persist(state).await?;
        info!(
            run_id = %state.run_id,
            attempt = state.execution_attempt,
            from = %from,
            to = %next,
            "stage transition"
        );
        Ok(())
    }

    async fn finish(
        &self,
        state: &mut WorkflowState,
        stage: Stage,
        reason: impl Into<String>,
        error: Option<String>,
    ) -> Step {
        let reason = reason.into();
        state.terminate(stage, reason.clone(), error)?;
        self.persist(state).await?;
        if stage == Stage::Completed {
            info!(run_id = %state.run_id, %reason, "run completed");
        } else {
            warn!(
                run_id = %state.run_id,
                stage = %stage,
                %reason,
                fix_attempts = state.retry_count,
                "run ended without acceptance"
            );
        }
        Ok(())
    }

    async fn persist(&self, state: &WorkflowState) -> Step {
        self.states.save(state).await.map_err(|e| {
            self.stop_accepting(&e);
            DriveError::Persistence(e)
        })
    }

    fn stop_accepting(&self, err: &DomainError) {
        if self.accepting.swap(false, Ordering::SeqCst) {
            error!(error = %err, "workflow state persistence failed, no longer accepting runs");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::artifacts::InMemoryArtifactStore;
    use crate::adapters::execution::{ExecutionScript, ScriptedBackend};
    use crate::adapters::sqlite::{
        create_migrated_test_pool, SqliteFixLearningRepository, SqliteRunRecordRepository,
        SqliteWorkflowStateRepository,
    };
    use crate::domain::models::{CodeHandle, VerifierConfig};
    use crate::services::{IndependentVerifier, RootCauseAnalyzer};

    async fn deps(reviewer_id: &str) -> OrchestratorDeps {
        let pool = create_migrated_test_pool().await.unwrap();
        let artifacts = Arc::new(InMemoryArtifactStore::new());
        let verifier = IndependentVerifier::new(VerifierConfig {
            reviewer_id: reviewer_id.to_string(),
            ..VerifierConfig::default()
        })
        .with_store(artifacts.clone());
        OrchestratorDeps {
            backend: ScriptedBackend::shared(ExecutionScript::new(vec![])),
            verifier: Arc::new(verifier),
            diagnoser: Arc::new(RootCauseAnalyzer::new()),
            artifacts,
            states: Arc::new(SqliteWorkflowStateRepository::new(pool.clone())),
            records: Arc::new(SqliteRunRecordRepository::new(pool.clone())),
            learnings: Arc::new(SqliteFixLearningRepository::new(pool)),
        }
    }

    #[tokio::test]
    async fn test_verifier_must_not_be_the_executor() {
        let result = TestOrchestrator::new(Config::default(), deps("scripted-executor").await);
        assert!(matches!(result, Err(DomainError::VerifierNotIndependent(id)) if id == "scripted-executor"));
    }

    #[tokio::test]
    async fn test_unknown_run_is_not_found() {
        let orchestrator = TestOrchestrator::new(Config::default(), deps("reviewer").await).unwrap();
        let run_id = Uuid::new_v4();
        assert!(matches!(orchestrator.get_status(run_id).await, Err(DomainError::RunNotFound(id)) if id == run_id));
        assert!(matches!(orchestrator.get_report(run_id).await, Err(DomainError::RunNotFound(_))));
        assert!(matches!(orchestrator.cancel(run_id, "x").await, Err(DomainError::RunNotFound(_))));
    }

    #[tokio::test]
    async fn test_duplicate_start_is_reported() {
        let orchestrator = TestOrchestrator::new(Config::default(), deps("reviewer").await).unwrap();
        let request = VerificationRequest::new(Uuid::new_v4(), CodeHandle::new("commit:1"), vec![]);

        assert_eq!(orchestrator.start_verification(request.clone()).await.unwrap(), StartOutcome::Accepted);
        assert_eq!(orchestrator.start_verification(request.clone()).await.unwrap(), StartOutcome::AlreadyExists);
        orchestrator.wait(request.run_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_run_does_not_complete_from_saved_stage() {
        let orchestrator = TestOrchestrator::new(Config::default(), deps("reviewer").await).unwrap();
        let request = VerificationRequest::new(Uuid::new_v4(), CodeHandle::new("commit:2"), vec![]);
        let run_id = request.run_id;

        let mut state = WorkflowState::new(&request);
        state.execution_attempt = 1;
        for next in [
            Stage::Executing,
            Stage::EvidenceCollected,
            Stage::RedFlagChecked,
            Stage::Verifying,
            Stage::Accepted,
        ] {
            state.transition(next, "restored").unwrap();
        }
        assert!(orchestrator.inner.states.insert(&state).await.unwrap());

        let control = Arc::new(RunControl::new());
        *control.reason.write().await = Some("operator stop".to_string());
        control.cancel.cancel();
        orchestrator.inner.clone().supervise(state, control.clone()).await;

        let state = orchestrator.get_status(run_id).await.unwrap();
        assert_eq!(state.stage, Stage::Failed);
        assert_eq!(state.reason.as_deref(), Some("cancelled: operator stop"));
        assert!(control.finished.is_cancelled());
    }

    #[test]
    fn test_panic_message_is_extracted() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("boom"));
        let borrowed: Box<dyn Any + Send> = Box::new("bang");
        let other: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(owned.as_ref()), "boom");
        assert_eq!(panic_message(borrowed.as_ref()), "bang");
        assert_eq!(panic_message(other.as_ref()), "unknown panic payload");
    }

    #[test]
    fn test_slot_holding_stages() {
        assert!(holds_slot(Stage::Executing));
        assert!(holds_slot(Stage::FixApplying));
        assert!(!holds_slot(Stage::Verifying));
        assert!(!holds_slot(Stage::Diagnosing));
    }
}
