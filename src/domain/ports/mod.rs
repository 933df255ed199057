//! Port trait definitions (Hexagonal Architecture)
//!
//! This module defines async trait interfaces that adapters must implement:
//! - ArtifactStore: content-addressed artifact bytes
//! - ExecutionBackend: opaque test execution and fix application
//! - EvidenceVerifier / RootCauseDiagnoser: model-backed analysis calls
//! - WorkflowStateRepository, RunRecordRepository, FixLearningRepository: persistence
//!
//! The orchestrator only ever talks to these traits, never to a concrete adapter.

pub mod analysis;
pub mod artifact_store;
pub mod execution_backend;
pub mod fix_learning_repository;
pub mod run_record_repository;
pub mod workflow_state_repository;

pub use analysis::{DiagnosisInput, EvidenceVerifier, RootCauseDiagnoser};
pub use artifact_store::ArtifactStore;
pub use execution_backend::{ExecutionBackend, FixRequest};
pub use fix_learning_repository::FixLearningRepository;
pub use run_record_repository::RunRecordRepository;
pub use workflow_state_repository::WorkflowStateRepository;
