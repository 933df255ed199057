//! Artifact store adapters.

pub mod fs;
pub mod memory;

pub use crate::domain::models::{content_hash, validate_hash};
pub use fs::FsArtifactStore;
pub use memory::InMemoryArtifactStore;
