//! Adapters for persistence, artifact storage and execution backends.

pub mod artifacts;
pub mod execution;
pub mod sqlite;
