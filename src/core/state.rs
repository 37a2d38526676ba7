//! Execution state models

use crate::core::context::JobOutput;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Overall run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Run has not started
    Pending,
    /// Run is in progress
    Running,
    /// Every job succeeded or was skipped by its gate
    Completed,
    /// At least one job failed
    Failed,
    /// The repository guard rejected the trigger
    Aborted,
    /// The trigger is not a push on the primary branch
    NotTriggered,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "Pending",
            ExecutionStatus::Running => "Running",
            ExecutionStatus::Completed => "Completed",
            ExecutionStatus::Failed => "Failed",
            ExecutionStatus::Aborted => "Aborted",
            ExecutionStatus::NotTriggered => "NotTriggered",
        }
    }

    /// Process exit code for a finished run
    pub fn exit_code(&self) -> i32 {
        match self {
            ExecutionStatus::Completed | ExecutionStatus::NotTriggered => 0,
            ExecutionStatus::Aborted => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(ExecutionStatus::Pending),
            "Running" => Ok(ExecutionStatus::Running),
            "Completed" => Ok(ExecutionStatus::Completed),
            "Failed" => Ok(ExecutionStatus::Failed),
            "Aborted" => Ok(ExecutionStatus::Aborted),
            "NotTriggered" => Ok(ExecutionStatus::NotTriggered),
            other => Err(format!("unknown execution status: {}", other)),
        }
    }
}

/// Why a job never ran
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// The job's gate evaluated to false
    GateClosed { gate: String },
    /// A job in `needs` failed
    UpstreamFailed { job: String },
    /// A job in `needs` was itself skipped
    UpstreamSkipped { job: String },
    /// The repository guard rejected the run
    RunAborted,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::GateClosed { gate } => write!(f, "gate {} is false", gate),
            SkipReason::UpstreamFailed { job } => write!(f, "upstream job '{}' failed", job),
            SkipReason::UpstreamSkipped { job } => write!(f, "upstream job '{}' was skipped", job),
            SkipReason::RunAborted => f.write_str("run aborted by repository guard"),
        }
    }
}

/// State of a single job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobState {
    /// Waiting for upstream jobs
    Pending,
    /// Job is currently running
    Running { started_at: DateTime<Utc> },
    /// Job finished successfully
    Succeeded {
        output: JobOutput,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    },
    /// Job failed
    Failed {
        error: String,
        started_at: DateTime<Utc>,
        failed_at: DateTime<Utc>,
    },
    /// Job never started
    Skipped { reason: SkipReason },
}

impl JobState {
    /// Check if job is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded { .. } | JobState::Failed { .. } | JobState::Skipped { .. }
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobState::Succeeded { .. })
    }

    pub fn output(&self) -> Option<&JobOutput> {
        match self {
            JobState::Succeeded { output, .. } => Some(output),
            _ => None,
        }
    }
}

/// Overall run state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    /// Unique run ID
    pub run_id: Uuid,

    /// Current status
    pub status: ExecutionStatus,

    /// When the run started
    pub started_at: Option<DateTime<Utc>>,

    /// When the run finished
    pub completed_at: Option<DateTime<Utc>>,

    pub total_jobs: usize,
    pub succeeded_jobs: usize,
    pub failed_jobs: usize,
    pub skipped_jobs: usize,
    pub running_jobs: usize,
}

impl RunState {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            status: ExecutionStatus::Pending,
            started_at: None,
            completed_at: None,
            total_jobs: 0,
            succeeded_jobs: 0,
            failed_jobs: 0,
            skipped_jobs: 0,
            running_jobs: 0,
        }
    }

    /// Mark run as started
    pub fn start(&mut self, total_jobs: usize) {
        self.status = ExecutionStatus::Running;
        self.started_at = Some(Utc::now());
        self.total_jobs = total_jobs;
    }

    /// Set a terminal status
    pub fn finish(&mut self, status: ExecutionStatus) {
        self.status = status;
        self.completed_at = Some(Utc::now());
    }

    pub fn update_counts(&mut self, succeeded: usize, failed: usize, skipped: usize, running: usize) {
        self.succeeded_jobs = succeeded;
        self.failed_jobs = failed;
        self.skipped_jobs = skipped;
        self.running_jobs = running;
    }

    /// Fraction of jobs in a terminal state (0.0 to 1.0)
    pub fn progress(&self) -> f64 {
        if self.total_jobs == 0 {
            return 0.0;
        }
        (self.succeeded_jobs + self.failed_jobs + self.skipped_jobs) as f64 / self.total_jobs as f64
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}
