//! Scripted execution backend.
//!
//! Plays back a fixed sequence of test outputs and fix outcomes. Used by the
//! `replay` command and by tests; each run gets its own cursor so concurrent
//! runs sharing one backend see the same script independently.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{CodeHandle, RawExecutionOutput};
use crate::domain::ports::{ExecutionBackend, FixRequest};

/// Result of one scripted `run_test` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptedExecution {
    Output(RawExecutionOutput),
    /// The backend call itself fails.
    Error(String),
}

/// Result of one scripted `apply_fix` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptedFix {
    /// When set, the fix application fails with this message.
    #[serde(default)]
    pub error: Option<String>,
    /// Handle returned for the changed code; defaults to `<target>+<strategy>`.
    #[serde(default)]
    pub new_target: Option<String>,
}

impl ScriptedFix {
    pub fn success() -> Self {
        Self::default()
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            new_target: None,
        }
    }
}

fn default_executor_id() -> String {
    "scripted-executor".to_string()
}

/// Playback script. The last execution repeats once the list is exhausted;
/// fixes beyond the list succeed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionScript {
    #[serde(default = "default_executor_id")]
    pub executor_id: String,
    pub executions: Vec<ScriptedExecution>,
    #[serde(default)]
    pub fixes: Vec<ScriptedFix>,
    /// Artificial latency added to every backend call.
    #[serde(default)]
    pub delay_ms: u64,
}

impl ExecutionScript {
    pub fn new(executions: Vec<ScriptedExecution>) -> Self {
        Self {
            executor_id: default_executor_id(),
            executions,
            fixes: Vec::new(),
            delay_ms: 0,
        }
    }

    pub fn with_fixes(mut self, fixes: Vec<ScriptedFix>) -> Self {
        self.fixes = fixes;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_executor_id(mut self, id: impl Into<String>) -> Self {
        self.executor_id = id.into();
        self
    }
}

#[derive(Debug, Default)]
struct Cursor {
    executions: usize,
    fixes: usize,
}

/// Execution backend that replays an [`ExecutionScript`].
pub struct ScriptedBackend {
    script: ExecutionScript,
    cursors: RwLock<HashMap<Uuid, Cursor>>,
    fix_requests: RwLock<Vec<FixRequest>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new(script: ExecutionScript) -> Self {
        Self {
            script,
            cursors: RwLock::new(HashMap::new()),
            fix_requests: RwLock::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn shared(script: ExecutionScript) -> Arc<Self> {
        Arc::new(Self::new(script))
    }

    /// Every fix request received so far, in call order.
    pub async fn fix_requests(&self) -> Vec<FixRequest> {
        self.fix_requests.read().await.clone()
    }

    /// Number of `run_test` calls made for a run.
    pub async fn executions_for(&self, run_id: Uuid) -> usize {
        self.cursors
            .read()
            .await
            .get(&run_id)
            .map_or(0, |c| c.executions)
    }

    /// Highest number of backend calls observed running at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    async fn simulate_latency(&self) {
        if self.script.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.script.delay_ms)).await;
        }
    }

    fn enter(&self) -> InFlightGuard<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlightGuard(&self.in_flight)
    }
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ExecutionBackend for ScriptedBackend {
    fn executor_id(&self) -> &str {
        &self.script.executor_id
    }

    async fn run_test(
        &self,
        run_id: Uuid,
        _target: &CodeHandle,
        _criteria: &[String],
    ) -> DomainResult<RawExecutionOutput> {
        let _guard = self.enter();
        let index = {
            let mut cursors = self.cursors.write().await;
            let cursor = cursors.entry(run_id).or_default();
            cursor.executions += 1;
            cursor.executions - 1
        };
        self.simulate_latency().await;

        let step = self
            .script
            .executions
            .get(index)
            .or_else(|| self.script.executions.last())
            .ok_or_else(|| DomainError::ExecutionFailed("script has no executions".to_string()))?;

        match step {
            ScriptedExecution::Output(output) => Ok(output.clone()),
            ScriptedExecution::Error(message) => Err(DomainError::ExecutionFailed(message.clone())),
        }
    }

    async fn apply_fix(&self, request: &FixRequest) -> DomainResult<CodeHandle> {
        let _guard = self.enter();
        let index = {
            let mut cursors = self.cursors.write().await;
            let cursor = cursors.entry(request.run_id).or_default();
            cursor.fixes += 1;
            cursor.fixes - 1
        };
        self.fix_requests.write().await.push(request.clone());
        self.simulate_latency().await;

        let fix = self.script.fixes.get(index).cloned().unwrap_or_default();
        if let Some(error) = fix.error {
            return Err(DomainError::ExecutionFailed(error));
        }
        Ok(CodeHandle::new(fix.new_target.unwrap_or_else(|| {
            format!("{}+{}", request.target, request.strategy)
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ExecutionKind;
    use chrono::Utc;

    fn output(passed: bool) -> RawExecutionOutput {
        let now = Utc::now();
        RawExecutionOutput {
            execution_kind: ExecutionKind::Programmatic,
            started_at: now,
            finished_at: now,
            artifacts: vec![],
            claims: vec![],
            outcome: Some(crate::domain::models::RawOutcome {
                passed,
                duration_ms: Some(10),
                assertions: Default::default(),
                coverage_percent: None,
                explanation: None,
                error_message: None,
            }),
            crash_reason: None,
        }
    }

    #[tokio::test]
    async fn test_last_execution_repeats_per_run() {
        let backend = ScriptedBackend::new(ExecutionScript::new(vec![
            ScriptedExecution::Output(output(false)),
            ScriptedExecution::Output(output(true)),
        ]));
        let run_a = Uuid::new_v4();
        let run_b = Uuid::new_v4();
        let target = CodeHandle::new("c");

        let first = backend.run_test(run_a, &target, &[]).await.unwrap();
        assert!(!first.outcome.unwrap().passed);
        assert!(backend.run_test(run_a, &target, &[]).await.unwrap().outcome.unwrap().passed);
        assert!(backend.run_test(run_a, &target, &[]).await.unwrap().outcome.unwrap().passed);

        let other = backend.run_test(run_b, &target, &[]).await.unwrap();
        assert!(!other.outcome.unwrap().passed);
        assert_eq!(backend.executions_for(run_a).await, 3);
    }

    #[tokio::test]
    async fn test_scripted_error_is_execution_failure() {
        let backend = ScriptedBackend::new(ExecutionScript::new(vec![ScriptedExecution::Error(
            "runner crashed".to_string(),
        )]));
        let err = backend
            .run_test(Uuid::new_v4(), &CodeHandle::new("c"), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::ExecutionFailed(m) if m == "runner crashed"));
    }

    #[test]
    fn test_script_parses_from_json() {
        let json = r#"{
            "executions": [{"error": "boom"}],
            "fixes": [{"error": "patch rejected"}, {}]
        }"#;
        let script: ExecutionScript = serde_json::from_str(json).unwrap();
        assert_eq!(script.executor_id, "scripted-executor");
        assert_eq!(script.fixes[0], ScriptedFix::failure("patch rejected"));
        assert_eq!(script.fixes[1], ScriptedFix::success());
    }
}
