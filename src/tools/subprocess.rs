//! Subprocess runner - executes external tools and captures their output

use crate::tools::{Invocation, ToolError, ToolOutput, ToolRunner};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Runs tools as child processes
#[derive(Debug, Clone)]
pub struct SubprocessRunner {
    /// Timeout for a single command in seconds
    timeout_secs: u64,
}

impl SubprocessRunner {
    pub fn new(timeout_secs: u64) -> Self {
        Self { timeout_secs }
    }
}

#[async_trait]
impl ToolRunner for SubprocessRunner {
    async fn run(&self, invocation: &Invocation) -> Result<ToolOutput, ToolError> {
        debug!("Spawning: {}", invocation);

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(cwd) = &invocation.cwd {
            command.current_dir(cwd);
        }
        for (key, value) in &invocation.env {
            command.env(key, value);
        }
        for (key, secret) in &invocation.secret_env {
            command.env(key, secret.expose());
        }

        let result = timeout(Duration::from_secs(self.timeout_secs), command.output())
            .await
            .map_err(|_| ToolError::Timeout {
                program: invocation.program.clone(),
                secs: self.timeout_secs,
            })?;

        let output = result.map_err(|source| ToolError::Spawn {
            program: invocation.program.clone(),
            source,
        })?;

        let output = ToolOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if output.is_success() {
            debug!("{} returned {} bytes of output", invocation.program, output.stdout.len());
        } else {
            warn!(
                "{} exited with code {}",
                invocation.program,
                output.code.unwrap_or(-1)
            );
        }

        Ok(output)
    }
}
