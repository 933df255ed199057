//! Verifix - evidence-based verification for autonomous test runs
//!
//! Verifix sits between a test executor and a human reviewer. Every test run
//! is captured as an immutable evidence bundle, screened for red flags,
//! reviewed by a separately provisioned verifier and, when rejected,
//! diagnosed and retried with a fix strategy chosen from what worked before.
//! Fix attempts climb a ladder of model tiers until the failure is fixed, the
//! attempt or cost budget runs out, or no untried strategy is left.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): models, port traits and errors
//! - **Service Layer** (`services`): one pipeline step per service
//! - **Application Layer** (`application`): the per-run state machine, stage
//!   deadlines and execution slots
//! - **Adapters** (`adapters`): SQLite persistence, artifact stores and
//!   execution backends
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use verifix::application::TestOrchestrator;
//! use verifix::domain::models::{CodeHandle, VerificationRequest};
//!
//! let orchestrator = TestOrchestrator::new(config, deps)?;
//! let run_id = uuid::Uuid::new_v4();
//! orchestrator
//!     .start_verification(VerificationRequest::new(run_id, CodeHandle::new("HEAD"), vec![]))
//!     .await?;
//! let state = orchestrator.wait(run_id).await?;
//! ```

pub mod adapters;
pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use application::{OrchestratorDeps, SchedulerStats, TestOrchestrator};
pub use domain::errors::{DomainError, DomainResult};
pub use domain::models::{
    CodeHandle, Config, EvidenceBundle, FixAttempt, FixLearning, FixStrategy, RedFlag,
    RootCauseAnalysis, RunReport, RunStatus, Stage, StartOutcome, VerificationReport,
    VerificationRequest, WorkflowState,
};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{FixLearningStore, KnowledgeGraph};
