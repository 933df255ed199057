//! CLI command implementations.

pub mod config;
pub mod learning;
pub mod replay;
pub mod run;
