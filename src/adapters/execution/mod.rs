//! Execution backend adapters.

pub mod scripted;

pub use scripted::{ExecutionScript, ScriptedBackend, ScriptedExecution, ScriptedFix};
