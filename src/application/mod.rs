//! Application layer: the run state machine and the resources it shares.

pub mod resource_manager;
pub mod stage_runner;
pub mod test_orchestrator;

pub use resource_manager::{ResourceManager, SchedulerStats};
pub use stage_runner::{StageError, StageRunner};
pub use test_orchestrator::{load_report, OrchestratorDeps, TestOrchestrator};
