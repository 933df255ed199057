//! Wiring shared by every command: configuration, database and adapters.

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::adapters::artifacts::FsArtifactStore;
use crate::adapters::execution::ExecutionScript;
use crate::adapters::sqlite::{
    database_url, initialize_database, PoolConfig, SqliteFixLearningRepository,
    SqliteRunRecordRepository, SqliteWorkflowStateRepository,
};
use crate::application::{OrchestratorDeps, TestOrchestrator};
use crate::domain::models::Config;
use crate::domain::ports::{
    ArtifactStore, ExecutionBackend, FixLearningRepository, RunRecordRepository,
    WorkflowStateRepository,
};
use crate::infrastructure::config::ConfigLoader;
use crate::services::{FixLearningStore, IndependentVerifier, RootCauseAnalyzer};

/// Load the configuration from `path`, or from the default locations.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    }
}

/// Read a JSON execution script.
pub fn load_script(path: &Path) -> Result<ExecutionScript> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read script {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid script {}", path.display()))
}

/// Open database connections and adapters for one CLI invocation.
pub struct AppContext {
    pub config: Config,
    pub pool: SqlitePool,
    pub states: Arc<dyn WorkflowStateRepository>,
    pub records: Arc<dyn RunRecordRepository>,
    pub learnings: Arc<dyn FixLearningRepository>,
    pub artifacts: Arc<dyn ArtifactStore>,
}

impl AppContext {
    pub async fn open(config: Config) -> Result<Self> {
        let url = database_url(&config.database.path);
        debug!(%url, "opening database");
        let pool = initialize_database(&url, Some(PoolConfig::from(&config.database)))
            .await
            .context("Failed to initialize database")?;

        Ok(Self {
            states: Arc::new(SqliteWorkflowStateRepository::new(pool.clone())),
            records: Arc::new(SqliteRunRecordRepository::new(pool.clone())),
            learnings: Arc::new(SqliteFixLearningRepository::new(pool.clone())),
            artifacts: Arc::new(FsArtifactStore::new(PathBuf::from(&config.artifacts.root))),
            pool,
            config,
        })
    }

    pub fn learning_store(&self) -> FixLearningStore {
        FixLearningStore::new(self.learnings.clone(), self.config.learning.clone())
    }

    /// Build an orchestrator that executes tests through `backend`.
    pub fn orchestrator(&self, backend: Arc<dyn ExecutionBackend>) -> Result<TestOrchestrator> {
        let verifier = IndependentVerifier::new(self.config.verifier.clone())
            .with_store(self.artifacts.clone());
        let deps = OrchestratorDeps {
            backend,
            verifier: Arc::new(verifier),
            diagnoser: Arc::new(RootCauseAnalyzer::new()),
            artifacts: self.artifacts.clone(),
            states: self.states.clone(),
            records: self.records.clone(),
            learnings: self.learnings.clone(),
        };
        Ok(TestOrchestrator::new(self.config.clone(), deps)?)
    }
}
