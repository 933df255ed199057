//! Evidence bundle domain model.
//!
//! An evidence bundle is the immutable record of everything captured during
//! one test execution attempt. Artifacts are content-addressed and carry a
//! kind-specific payload so that detectors can match on them exhaustively.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use uuid::Uuid;

/// How the test under verification was executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionKind {
    /// Browser / UI driven execution.
    Interactive,
    /// HTTP / API driven execution.
    Programmatic,
}

impl ExecutionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Interactive => "interactive",
            Self::Programmatic => "programmatic",
        }
    }
}

/// Status a log artifact reports about the test run, parsed from its text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportedStatus {
    Passed,
    Failed,
}

/// Direction of a recorded tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallDirection {
    Request,
    Response,
}

/// Aggregated assertion counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionCounts {
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
}

impl AssertionCounts {
    pub fn new(total: u32, passed: u32, failed: u32) -> Self {
        Self { total, passed, failed }
    }

    /// Whether passed + failed add up to the reported total.
    pub fn is_consistent(&self) -> bool {
        self.passed.saturating_add(self.failed) == self.total
    }
}

/// Kind of an artifact, without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Screenshot,
    DomSnapshot,
    Log,
    Trace,
    NetworkTrace,
    ToolCall,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Screenshot => "screenshot",
            Self::DomSnapshot => "dom_snapshot",
            Self::Log => "log",
            Self::Trace => "trace",
            Self::NetworkTrace => "network_trace",
            Self::ToolCall => "tool_call",
        }
    }
}

/// Kind-specific metadata of an artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArtifactPayload {
    Screenshot {
        width: u32,
        height: u32,
        #[serde(default)]
        step: Option<String>,
    },
    DomSnapshot {
        #[serde(default)]
        url: Option<String>,
        element_count: u32,
        #[serde(default)]
        step: Option<String>,
    },
    Log {
        source: String,
        #[serde(default)]
        line_count: u32,
        #[serde(default)]
        reported_status: Option<ReportedStatus>,
    },
    /// A process execution trace (build, test run, script).
    Trace {
        command: String,
        #[serde(default)]
        exit_code: Option<i32>,
        #[serde(default)]
        tests: Option<AssertionCounts>,
        /// Tool invocation ids this trace claims to have performed.
        #[serde(default)]
        tool_refs: Vec<String>,
    },
    NetworkTrace {
        method: String,
        url: String,
        #[serde(default)]
        status: Option<u16>,
    },
    ToolCall {
        call_id: String,
        tool: String,
        direction: ToolCallDirection,
    },
}

impl ArtifactPayload {
    pub fn kind(&self) -> ArtifactKind {
        match self {
            Self::Screenshot { .. } => ArtifactKind::Screenshot,
            Self::DomSnapshot { .. } => ArtifactKind::DomSnapshot,
            Self::Log { .. } => ArtifactKind::Log,
            Self::Trace { .. } => ArtifactKind::Trace,
            Self::NetworkTrace { .. } => ArtifactKind::NetworkTrace,
            Self::ToolCall { .. } => ArtifactKind::ToolCall,
        }
    }

    /// The UI step this artifact documents, if any.
    pub fn step(&self) -> Option<&str> {
        match self {
            Self::Screenshot { step, .. } | Self::DomSnapshot { step, .. } => step.as_deref(),
            _ => None,
        }
    }
}

/// Reference to one persisted artifact. Bytes live in the artifact store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub name: String,
    pub content_hash: String,
    pub storage_path: String,
    pub size_bytes: u64,
    pub captured_at: DateTime<Utc>,
    pub payload: ArtifactPayload,
}

impl ArtifactRef {
    pub fn kind(&self) -> ArtifactKind {
        self.payload.kind()
    }
}

/// Category of an action the executor claims to have performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimKind {
    RanBuild,
    RanTests,
    VisitedPage,
    CalledApi,
    InvokedTool,
    Other,
}

impl ClaimKind {
    /// Whether an artifact payload constitutes direct evidence of this claim.
    pub fn is_evidenced_by(&self, payload: &ArtifactPayload) -> bool {
        match (self, payload) {
            (Self::RanBuild, ArtifactPayload::Trace { command, .. }) => {
                command.to_lowercase().contains("build")
            }
            (Self::RanBuild, ArtifactPayload::Log { source, .. }) => {
                source.to_lowercase().contains("build")
            }
            (Self::RanTests, ArtifactPayload::Trace { command, tests, .. }) => {
                tests.is_some() || command.to_lowercase().contains("test")
            }
            (Self::VisitedPage, ArtifactPayload::Screenshot { .. })
            | (Self::VisitedPage, ArtifactPayload::DomSnapshot { .. })
            | (Self::CalledApi, ArtifactPayload::NetworkTrace { .. })
            | (Self::InvokedTool, ArtifactPayload::ToolCall { .. }) => true,
            (Self::Other, _) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RanBuild => "ran_build",
            Self::RanTests => "ran_tests",
            Self::VisitedPage => "visited_page",
            Self::CalledApi => "called_api",
            Self::InvokedTool => "invoked_tool",
            Self::Other => "other",
        }
    }
}

/// An action the executor reports as done.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimedAction {
    pub description: String,
    pub kind: ClaimKind,
    #[serde(default)]
    pub tool_call_id: Option<String>,
}

impl ClaimedAction {
    pub fn new(kind: ClaimKind, description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            kind,
            tool_call_id: None,
        }
    }

    pub fn with_tool_call(mut self, call_id: impl Into<String>) -> Self {
        self.tool_call_id = Some(call_id.into());
        self
    }
}

/// Structured outcome of one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeSummary {
    pub passed: bool,
    pub duration_ms: u64,
    #[serde(default)]
    pub assertions: AssertionCounts,
    #[serde(default)]
    pub coverage_percent: Option<f64>,
    /// Executor-supplied explanation for intentional coverage/assertion changes.
    #[serde(default)]
    pub explanation: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Immutable record of one execution attempt.
///
/// Fields are private and there are no mutating methods: a new attempt
/// produces a new bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceBundle {
    id: Uuid,
    run_id: Uuid,
    attempt: u32,
    execution_kind: ExecutionKind,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    artifacts: Vec<ArtifactRef>,
    claims: Vec<ClaimedAction>,
    outcome: OutcomeSummary,
    created_at: DateTime<Utc>,
}

impl EvidenceBundle {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        run_id: Uuid,
        attempt: u32,
        execution_kind: ExecutionKind,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        artifacts: Vec<ArtifactRef>,
        claims: Vec<ClaimedAction>,
        outcome: OutcomeSummary,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id,
            attempt,
            execution_kind,
            started_at,
            finished_at,
            artifacts,
            claims,
            outcome,
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn execution_kind(&self) -> ExecutionKind {
        self.execution_kind
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }

    pub fn artifacts(&self) -> &[ArtifactRef] {
        &self.artifacts
    }

    pub fn claims(&self) -> &[ClaimedAction] {
        &self.claims
    }

    pub fn outcome(&self) -> &OutcomeSummary {
        &self.outcome
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn artifacts_of(&self, kind: ArtifactKind) -> impl Iterator<Item = &ArtifactRef> {
        self.artifacts.iter().filter(move |a| a.kind() == kind)
    }

    /// Set of content hashes in this bundle.
    pub fn content_hashes(&self) -> BTreeSet<&str> {
        self.artifacts.iter().map(|a| a.content_hash.as_str()).collect()
    }

    /// SHA-256 over the canonical JSON encoding, used to check re-reads are byte-identical.
    pub fn fingerprint(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }
}

/// Content of a raw artifact as emitted by an execution driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArtifactContent {
    Text(String),
    Bytes(Vec<u8>),
}

impl ArtifactContent {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(s) => s.as_bytes(),
            Self::Bytes(b) => b,
        }
    }
}

/// One unprocessed artifact from an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawArtifact {
    pub name: String,
    pub captured_at: DateTime<Utc>,
    pub payload: ArtifactPayload,
    pub content: ArtifactContent,
}

/// Outcome as reported by the execution driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawOutcome {
    pub passed: bool,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub assertions: AssertionCounts,
    #[serde(default)]
    pub coverage_percent: Option<f64>,
    #[serde(default)]
    pub explanation: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Everything an execution driver hands back for one test run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawExecutionOutput {
    pub execution_kind: ExecutionKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(default)]
    pub artifacts: Vec<RawArtifact>,
    #[serde(default)]
    pub claims: Vec<ClaimedAction>,
    /// `None` when the driver crashed before reporting.
    #[serde(default)]
    pub outcome: Option<RawOutcome>,
    #[serde(default)]
    pub crash_reason: Option<String>,
}
