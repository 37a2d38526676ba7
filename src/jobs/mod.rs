//! Release pipeline components
//!
//! Each submodule implements one job kind. Components receive their spec,
//! the run context and the collaborators they need, and return a typed
//! output; scheduling and state transitions live in `execution`.

pub mod changes;
pub mod guard;
pub mod publish;
pub mod release;
pub mod sync;

use crate::core::{config::GuardMode, secret::SecretStore};
use crate::tools::{Invocation, ToolError, ToolOutput, ToolRunner};
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

/// Component failures
#[derive(Debug, Error)]
pub enum JobError {
    #[error("repository owner '{owner}' rejected by guard ({mode} '{expected}')")]
    GuardRejected {
        owner: String,
        expected: String,
        mode: GuardMode,
    },

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("gate could not be evaluated: {0}")]
    GateUndetermined(String),

    #[error("could not extract a version from `{command}` output")]
    Version { command: String },

    #[error("job '{job}' did not produce the expected output")]
    MissingOutput { job: String },

    #[error("revision '{rev}' does not resolve to a commit")]
    UnknownRevision { rev: String },

    #[error("no artifacts matched {patterns:?} under {dir}")]
    NoArtifacts { patterns: Vec<String>, dir: PathBuf },

    #[error("asset '{name}' is already attached to {tag}")]
    AssetExists { name: String, tag: String },

    #[error("secret slot '{slot}' is empty")]
    MissingSecret { slot: String },

    #[error("empty command")]
    EmptyCommand,

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("timed out after {secs} seconds")]
    Timeout { secs: u64 },

    #[error("job panicked: {0}")]
    Panicked(String),
}

impl JobError {
    pub fn is_guard_rejection(&self) -> bool {
        matches!(self, JobError::GuardRejected { .. })
    }
}

/// Run a templated command and fail on a non-zero exit
///
/// Known secret values are masked in the captured stderr before it becomes
/// part of an error.
pub(crate) async fn run_checked(
    runner: &dyn ToolRunner,
    invocation: &Invocation,
    secrets: &SecretStore,
) -> Result<ToolOutput, JobError> {
    let output = runner.run(invocation).await?;
    if output.is_success() {
        return Ok(output);
    }
    debug!("{} failed: {}", invocation, secrets.redact(output.stderr.trim()));
    Err(JobError::Tool(ToolError::Failed {
        program: invocation.program.clone(),
        code: output.code.unwrap_or(-1),
        stderr: secrets.redact(output.stderr.trim()),
    }))
}
