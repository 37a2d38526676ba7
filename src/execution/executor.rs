//! Job executor - runs individual jobs against the collaborators

use crate::{
    core::{secret::SecretStore, Job, JobKind, JobOutput, RunContext},
    jobs::{changes, guard, publish, release, sync, JobError},
    tools::Collaborators,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::{timeout, Duration};
use tracing::{error, info};

/// Executes a single job
pub struct JobExecutor {
    collaborators: Collaborators,
    secrets: Arc<SecretStore>,
    /// Repository checkout; job workdirs are relative to it
    root: PathBuf,
}

impl JobExecutor {
    pub fn new(collaborators: Collaborators, secrets: SecretStore, root: PathBuf) -> Self {
        Self {
            collaborators,
            secrets: Arc::new(secrets),
            root,
        }
    }

    /// Execute a job within its timeout and return its output
    pub async fn execute(&self, job: &Job, context: &RunContext) -> Result<JobOutput, JobError> {
        info!("Executing job: {} ({})", job.id, job.kind.kind_name());

        match timeout(Duration::from_secs(job.timeout_secs), self.dispatch(job, context)).await {
            Ok(Ok(output)) => {
                info!("Job {} succeeded: {}", job.id, output.summary());
                Ok(output)
            }
            Ok(Err(e)) => {
                error!("Job {} failed: {}", job.id, e);
                Err(e)
            }
            Err(_) => {
                error!("Timeout for job {} after {}s", job.id, job.timeout_secs);
                Err(JobError::Timeout {
                    secs: job.timeout_secs,
                })
            }
        }
    }

    async fn dispatch(&self, job: &Job, context: &RunContext) -> Result<JobOutput, JobError> {
        let tools = &self.collaborators;
        match &job.kind {
            JobKind::Guard(spec) => guard::check(spec, &context.trigger),
            JobKind::DetectChanges(spec) => changes::detect(spec, context, tools.vcs.as_ref())
                .await
                .map(JobOutput::Changes),
            JobKind::Release(spec) => release::create(
                spec,
                context,
                tools.runner.as_ref(),
                tools.host.as_ref(),
                &self.root,
            )
            .await
            .map(JobOutput::Release),
            JobKind::Publish(spec) => {
                publish::publish(spec, context, tools, &self.secrets, &self.root)
                    .await
                    .map(JobOutput::Published)
            }
            JobKind::SyncBranch(spec) => sync::sync(
                spec,
                &context.trigger,
                tools.vcs.as_ref(),
                tools.host.as_ref(),
            )
            .await
            .map(JobOutput::Synced),
        }
    }
}
