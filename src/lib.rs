//! release-gate - a push-triggered release runner
//!
//! A YAML pipeline names jobs of five kinds (repository guard, change
//! detection, release, publish, branch sync), their `needs` edges and the
//! change flags that gate them. The engine runs every job whose upstream jobs
//! succeeded and whose gate is open, and drives git, the `gh` CLI and the
//! configured build and publish tools through the traits in [`tools`].

pub mod cli;
pub mod core;
pub mod execution;
pub mod jobs;
pub mod persistence;
pub mod tools;

// Re-export commonly used types
pub use core::{ExecutionStatus, Job, JobOutput, Pipeline, RunContext, TriggerContext};
pub use execution::{ExecutionEngine, ExecutionEvent, JobExecutor, SchedulingStrategy};
pub use jobs::JobError;
pub use tools::{Collaborators, ReleaseHost, ToolRunner, Vcs};
