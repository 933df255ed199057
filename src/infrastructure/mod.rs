//! Infrastructure layer module
//!
//! Process-wide concerns that sit outside the pipeline itself:
//! - Configuration management (figment)
//! - Logging (tracing-subscriber, tracing-appender)

pub mod config;
pub mod logging;
