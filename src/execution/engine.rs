//! Main execution engine - orchestrates a whole run

use crate::{
    core::{
        condition::GateDecision, ExecutionStatus, JobOutput, JobState, Pipeline, SkipReason,
        TriggerContext,
    },
    execution::{ExecutionScheduler, JobExecutor, SchedulingStrategy},
    jobs::JobError,
};
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Events that can occur during a run
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    RunStarted {
        run_id: Uuid,
        pipeline_name: String,
        total_jobs: usize,
    },
    RunNotTriggered {
        run_id: Uuid,
        reason: String,
    },
    JobStarted {
        job_id: String,
    },
    JobSucceeded {
        job_id: String,
        output: JobOutput,
    },
    JobSkipped {
        job_id: String,
        reason: SkipReason,
    },
    JobFailed {
        job_id: String,
        error: String,
    },
    RunCompleted {
        run_id: Uuid,
        status: ExecutionStatus,
    },
}

/// Engine failures that are not job failures
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("job '{0}' not found")]
    UnknownJob(String),

    #[error("run stuck: jobs pending but none can start")]
    Stuck,
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Main execution engine
pub struct ExecutionEngine {
    scheduler: ExecutionScheduler,
    executor: Arc<JobExecutor>,
    event_handlers: Arc<Mutex<Vec<EventHandler>>>,
}

impl ExecutionEngine {
    pub fn new(executor: JobExecutor, strategy: SchedulingStrategy) -> Self {
        Self {
            scheduler: ExecutionScheduler::new(strategy),
            executor: Arc::new(executor),
            event_handlers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Add an event handler
    pub async fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.event_handlers.lock().await.push(Arc::new(handler));
    }

    /// Emit an event to all handlers
    async fn emit_event(&self, event: ExecutionEvent) {
        let handlers = self.event_handlers.lock().await;
        for handler in handlers.iter() {
            handler(event.clone());
        }
    }

    /// Execute the pipeline for one trigger and return the final run status
    pub async fn execute(
        &self,
        pipeline: &mut Pipeline,
        trigger: &TriggerContext,
    ) -> Result<ExecutionStatus, EngineError> {
        let run_id = pipeline.state.run_id;

        if let Some(reason) = pipeline.rejects_trigger(trigger) {
            info!("Not triggered: {}", reason);
            pipeline.state.finish(ExecutionStatus::NotTriggered);
            self.emit_event(ExecutionEvent::RunNotTriggered { run_id, reason })
                .await;
            return Ok(ExecutionStatus::NotTriggered);
        }

        info!("Starting run of {} ({})", pipeline.name, run_id);
        pipeline.state.start(pipeline.jobs.len());
        self.emit_event(ExecutionEvent::RunStarted {
            run_id,
            pipeline_name: pipeline.name.clone(),
            total_jobs: pipeline.jobs.len(),
        })
        .await;

        let mut running: JoinSet<(String, Result<JobOutput, JobError>)> = JoinSet::new();

        loop {
            let mut progressed = self.skip_blocked(pipeline).await;

            if !pipeline.is_aborted() {
                for job_id in self.scheduler.next_jobs(pipeline) {
                    progressed = true;
                    self.start_job(pipeline, &job_id, trigger, &mut running)
                        .await?;
                }
            }
            self.update_state_counts(pipeline);

            if running.is_empty() {
                if progressed {
                    continue;
                }
                break;
            }

            match running.join_next().await {
                Some(Ok((job_id, result))) => {
                    self.finish_job(pipeline, &job_id, result).await;
                }
                Some(Err(e)) => error!("Job task failed to join: {}", e),
                None => {}
            }
            self.update_state_counts(pipeline);
        }

        if !pipeline.is_complete() {
            error!("No jobs ready to run and none running - run stuck");
            pipeline.state.finish(ExecutionStatus::Failed);
            self.emit_event(ExecutionEvent::RunCompleted {
                run_id,
                status: ExecutionStatus::Failed,
            })
            .await;
            return Err(EngineError::Stuck);
        }

        let status = if pipeline.is_aborted() {
            ExecutionStatus::Aborted
        } else if pipeline.has_failed() {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Completed
        };
        pipeline.state.finish(status);

        info!("Run of {} finished: {}", pipeline.name, status);
        self.emit_event(ExecutionEvent::RunCompleted { run_id, status })
            .await;

        Ok(status)
    }

    /// Skip pending jobs whose upstream failed or was skipped
    async fn skip_blocked(&self, pipeline: &mut Pipeline) -> bool {
        let blocked = pipeline.blocked_jobs();
        let progressed = !blocked.is_empty();
        for (job_id, reason) in blocked {
            self.mark_job_skipped(pipeline, &job_id, reason).await;
        }
        progressed
    }

    /// Evaluate the job's gate and spawn it if open
    async fn start_job(
        &self,
        pipeline: &mut Pipeline,
        job_id: &str,
        trigger: &TriggerContext,
        running: &mut JoinSet<(String, Result<JobOutput, JobError>)>,
    ) -> Result<(), EngineError> {
        let job = pipeline
            .job(job_id)
            .cloned()
            .ok_or_else(|| EngineError::UnknownJob(job_id.to_string()))?;
        let context = pipeline.create_context_for_job(job_id, trigger);

        match job.gate.evaluate(&context.outputs) {
            GateDecision::Open => {}
            GateDecision::Closed => {
                let reason = SkipReason::GateClosed {
                    gate: job.gate.to_string(),
                };
                self.mark_job_skipped(pipeline, job_id, reason).await;
                return Ok(());
            }
            GateDecision::Undetermined(message) => {
                let error = JobError::GateUndetermined(message);
                self.mark_job_failed(pipeline, job_id, &error).await;
                return Ok(());
            }
        }

        if let Some(j) = pipeline.job_mut(job_id) {
            j.state = JobState::Running {
                started_at: Utc::now(),
            };
        }
        self.emit_event(ExecutionEvent::JobStarted {
            job_id: job_id.to_string(),
        })
        .await;

        let executor = self.executor.clone();
        running.spawn(async move {
            let id = job.id.clone();
            // Inner task so a panicking job surfaces as a job failure
            let handle = tokio::spawn(async move { executor.execute(&job, &context).await });
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(JobError::Panicked(e.to_string())),
            };
            (id, result)
        });

        Ok(())
    }

    async fn finish_job(
        &self,
        pipeline: &mut Pipeline,
        job_id: &str,
        result: Result<JobOutput, JobError>,
    ) {
        match result {
            Ok(output) => self.mark_job_success(pipeline, job_id, output).await,
            Err(e) if e.is_guard_rejection() => {
                self.mark_job_failed(pipeline, job_id, &e).await;
                self.abort(pipeline).await;
            }
            Err(e) => self.mark_job_failed(pipeline, job_id, &e).await,
        }
    }

    /// Stop the run after a guard rejection; nothing else may start
    async fn abort(&self, pipeline: &mut Pipeline) {
        warn!("Run aborted by repository guard");
        pipeline.state.status = ExecutionStatus::Aborted;

        let pending: Vec<String> = pipeline
            .execution_order()
            .iter()
            .filter(|id| {
                pipeline
                    .job(id)
                    .is_some_and(|j| matches!(j.state, JobState::Pending))
            })
            .cloned()
            .collect();
        for job_id in pending {
            self.mark_job_skipped(pipeline, &job_id, SkipReason::RunAborted)
                .await;
        }
    }

    /// Mark a job as succeeded
    async fn mark_job_success(&self, pipeline: &mut Pipeline, job_id: &str, output: JobOutput) {
        if let Some(job) = pipeline.job_mut(job_id) {
            let started_at = match &job.state {
                JobState::Running { started_at } => *started_at,
                _ => Utc::now(),
            };
            job.state = JobState::Succeeded {
                output: output.clone(),
                started_at,
                completed_at: Utc::now(),
            };
        }

        self.emit_event(ExecutionEvent::JobSucceeded {
            job_id: job_id.to_string(),
            output,
        })
        .await;
    }

    /// Mark a job as failed
    async fn mark_job_failed(&self, pipeline: &mut Pipeline, job_id: &str, error: &JobError) {
        if let Some(job) = pipeline.job_mut(job_id) {
            let started_at = match &job.state {
                JobState::Running { started_at } => *started_at,
                _ => Utc::now(),
            };
            job.state = JobState::Failed {
                error: error.to_string(),
                started_at,
                failed_at: Utc::now(),
            };
        }

        self.emit_event(ExecutionEvent::JobFailed {
            job_id: job_id.to_string(),
            error: error.to_string(),
        })
        .await;
    }

    async fn mark_job_skipped(&self, pipeline: &mut Pipeline, job_id: &str, reason: SkipReason) {
        warn!("Skipping job {}: {}", job_id, reason);
        if let Some(job) = pipeline.job_mut(job_id) {
            job.state = JobState::Skipped {
                reason: reason.clone(),
            };
        }

        self.emit_event(ExecutionEvent::JobSkipped {
            job_id: job_id.to_string(),
            reason,
        })
        .await;
    }

    /// Update run state counts
    fn update_state_counts(&self, pipeline: &mut Pipeline) {
        let mut succeeded = 0;
        let mut failed = 0;
        let mut skipped = 0;
        let mut running = 0;

        for job in pipeline.jobs.values() {
            match &job.state {
                JobState::Succeeded { .. } => succeeded += 1,
                JobState::Failed { .. } => failed += 1,
                JobState::Skipped { .. } => skipped += 1,
                JobState::Running { .. } => running += 1,
                JobState::Pending => {}
            }
        }

        pipeline
            .state
            .update_counts(succeeded, failed, skipped, running);
    }
}
