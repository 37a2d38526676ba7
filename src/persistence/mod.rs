//! Persistence layer for run history

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteRunStore;

pub use crate::core::ExecutionStatus;
use crate::core::{Pipeline, TriggerContext};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

/// Summary of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique run ID
    pub run_id: Uuid,

    pub pipeline_name: String,

    pub status: ExecutionStatus,

    /// Repository owner the trigger came from
    pub owner: String,

    pub branch: String,

    /// Commit the run was triggered for
    pub sha: String,

    pub started_at: DateTime<Utc>,

    pub completed_at: Option<DateTime<Utc>>,

    /// Progress (0.0 to 1.0)
    pub progress: f64,

    pub succeeded_jobs: usize,
    pub failed_jobs: usize,
    pub skipped_jobs: usize,
    pub total_jobs: usize,
}

/// Trait for persistence backends
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Save a run, replacing any earlier record with the same ID
    async fn save_run(&self, run: &RunSummary) -> Result<()>;

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>>;

    /// List runs of a pipeline, newest first
    async fn list_runs(&self, pipeline_name: &str) -> Result<Vec<RunSummary>>;

    async fn latest_run(&self, pipeline_name: &str) -> Result<Option<RunSummary>> {
        Ok(self.list_runs(pipeline_name).await?.into_iter().next())
    }

    /// List all pipeline names with recorded runs
    async fn list_pipelines(&self) -> Result<Vec<String>>;
}

/// In-memory persistence (for testing or `--no-history`)
#[derive(Default)]
pub struct InMemoryPersistence {
    runs: RwLock<HashMap<Uuid, RunSummary>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn save_run(&self, run: &RunSummary) -> Result<()> {
        self.runs.write().await.insert(run.run_id, run.clone());
        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>> {
        Ok(self.runs.read().await.get(&run_id).cloned())
    }

    async fn list_runs(&self, pipeline_name: &str) -> Result<Vec<RunSummary>> {
        let runs = self.runs.read().await;
        let mut result: Vec<RunSummary> = runs
            .values()
            .filter(|r| r.pipeline_name == pipeline_name)
            .cloned()
            .collect();
        result.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(result)
    }

    async fn list_pipelines(&self) -> Result<Vec<String>> {
        let runs = self.runs.read().await;
        let mut names: Vec<String> = runs.values().map(|r| r.pipeline_name.clone()).collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}

/// Create a summary from a finished pipeline run
pub fn create_summary(pipeline: &Pipeline, trigger: &TriggerContext) -> RunSummary {
    RunSummary {
        run_id: pipeline.state.run_id,
        pipeline_name: pipeline.name.clone(),
        status: pipeline.state.status,
        owner: trigger.owner.clone(),
        branch: trigger.branch.clone(),
        sha: trigger.after.clone(),
        started_at: pipeline.state.started_at.unwrap_or_else(Utc::now),
        completed_at: pipeline.state.completed_at,
        progress: pipeline.state.progress(),
        succeeded_jobs: pipeline.state.succeeded_jobs,
        failed_jobs: pipeline.state.failed_jobs,
        skipped_jobs: pipeline.state.skipped_jobs,
        total_jobs: pipeline.state.total_jobs,
    }
}

/// Save a finished run, logging instead of failing when the store is unavailable
///
/// Returns whether the run was recorded. History is never allowed to change
/// the outcome of the run itself.
pub async fn record_run(store: &dyn PersistenceBackend, summary: &RunSummary) -> bool {
    match store.save_run(summary).await {
        Ok(()) => true,
        Err(e) => {
            warn!("Could not save run {} to history: {:#}", summary.run_id, e);
            false
        }
    }
}
