//! External collaborators: subprocess tools, version control, release hosting

pub mod git;
pub mod github;
pub mod subprocess;

use crate::core::secret::Secret;
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

pub use git::{SystemGit, Vcs};
pub use github::{GhCli, PublishedRelease, PullRequestRequest, ReleaseHost, ReleaseRequest, UploadOutcome};
pub use subprocess::SubprocessRunner;

/// Error types for collaborator operations
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("{program} exited with code {code}: {stderr}")]
    Failed {
        program: String,
        code: i32,
        stderr: String,
    },

    #[error("{program} timed out after {secs} seconds")]
    Timeout { program: String, secs: u64 },

    #[error("unexpected output from {program}: {message}")]
    InvalidOutput { program: String, message: String },
}

/// One external command to run
#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// Environment entries whose values must never be printed
    pub secret_env: Vec<(String, Secret)>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            secret_env: Vec::new(),
        }
    }

    /// Build from an argument vector; `None` if it is empty
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(program.clone()).args(args.iter().cloned()))
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn secret_env(mut self, key: impl Into<String>, value: Secret) -> Self {
        self.secret_env.push((key.into(), value));
        self
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Captured result of a finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Exit code; `None` if killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }

    /// Convert a non-zero exit into `ToolError::Failed`
    pub fn into_result(self, program: &str) -> Result<Self, ToolError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(ToolError::Failed {
                program: program.to_string(),
                code: self.code.unwrap_or(-1),
                stderr: self.stderr.trim().to_string(),
            })
        }
    }

    /// stdout and stderr together, for pattern matching
    pub fn combined(&self) -> String {
        format!("{}\n{}", self.stdout, self.stderr)
    }
}

/// Trait for running external commands - allows for different implementations
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Run a command to completion.
    ///
    /// A non-zero exit is returned as `Ok`; only spawn failures and timeouts
    /// are errors.
    async fn run(&self, invocation: &Invocation) -> Result<ToolOutput, ToolError>;
}

/// The collaborators a run talks to
#[derive(Clone)]
pub struct Collaborators {
    pub runner: Arc<dyn ToolRunner>,
    pub vcs: Arc<dyn Vcs>,
    pub host: Arc<dyn ReleaseHost>,
}

impl Collaborators {
    /// System git and the `gh` CLI, both driven through one subprocess runner
    pub fn system(
        repo_dir: PathBuf,
        remote: String,
        github_repo: Option<String>,
        timeout_secs: u64,
    ) -> Self {
        let runner: Arc<dyn ToolRunner> = Arc::new(SubprocessRunner::new(timeout_secs));
        Self {
            vcs: Arc::new(SystemGit::new(runner.clone(), repo_dir.clone(), remote)),
            host: Arc::new(GhCli::new(runner.clone(), repo_dir, github_repo)),
            runner,
        }
    }
}
