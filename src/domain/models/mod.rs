pub mod config;
pub mod evidence;
pub mod fix;
pub mod hashing;
pub mod learning;
pub mod red_flag;
pub mod root_cause;
pub mod run;
pub mod verification;
pub mod workflow_state;

pub use config::{
    ArtifactsConfig, Config, DatabaseConfig, DetectorConfig, LearningConfig, LoggingConfig,
    RetryConfig, TimeoutConfig, VerifierConfig,
};
pub use evidence::{
    ArtifactContent, ArtifactKind, ArtifactPayload, ArtifactRef, AssertionCounts, ClaimKind,
    ClaimedAction, EvidenceBundle, ExecutionKind, OutcomeSummary, RawArtifact,
    RawExecutionOutput, RawOutcome, ReportedStatus, ToolCallDirection,
};
pub use fix::{default_tiers, failed_strategies, FixAttempt, FixStrategy, ModelTier};
pub use hashing::{content_hash, validate_hash};
pub use learning::{keyword_similarity, pattern_keywords, FixLearning, LearningQualifiers};
pub use red_flag::{max_severity, RedFlag, RedFlagCategory, Severity};
pub use root_cause::{Complexity, FailureCategory, RootCauseAnalysis};
pub use run::{CodeHandle, RunReport, StartOutcome, VerificationRequest};
pub use verification::{
    EvidenceFinding, FindingVerdict, Recommendation, VerificationPass, VerificationReport,
};
pub use workflow_state::{PendingFix, RunStatus, Stage, StageSnapshot, WorkflowState};
