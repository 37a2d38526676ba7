//! Version control collaborator

use crate::tools::{Invocation, ToolError, ToolRunner};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Read and write operations on the repository the run was triggered from
#[async_trait]
pub trait Vcs: Send + Sync {
    /// Resolve a revision to a commit SHA; `None` if it does not exist
    async fn resolve(&self, rev: &str) -> Result<Option<String>, ToolError>;

    /// First parent of a commit; `None` for a root commit
    async fn first_parent(&self, sha: &str) -> Result<Option<String>, ToolError>;

    /// Paths that differ between two commits
    async fn changed_paths(&self, base: &str, head: &str) -> Result<Vec<String>, ToolError>;

    /// Every tracked path in a commit
    async fn tree_paths(&self, sha: &str) -> Result<Vec<String>, ToolError>;

    /// Point `branch` at `sha` on the remote, discarding its history
    async fn force_update_branch(&self, branch: &str, sha: &str) -> Result<(), ToolError>;
}

/// `Vcs` backed by the system `git` binary
pub struct SystemGit {
    runner: Arc<dyn ToolRunner>,
    repo_dir: PathBuf,
    remote: String,
}

impl SystemGit {
    pub fn new(runner: Arc<dyn ToolRunner>, repo_dir: PathBuf, remote: String) -> Self {
        Self {
            runner,
            repo_dir,
            remote,
        }
    }

    fn git(&self) -> Invocation {
        Invocation::new("git").current_dir(&self.repo_dir)
    }

    async fn lines(&self, invocation: Invocation) -> Result<Vec<String>, ToolError> {
        let output = self.runner.run(&invocation).await?.into_result("git")?;
        Ok(output
            .stdout
            .lines()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect())
    }

    async fn rev_parse(&self, rev: &str) -> Result<Option<String>, ToolError> {
        let output = self
            .runner
            .run(
                &self
                    .git()
                    .args(["rev-parse", "--verify", "--quiet"])
                    .arg(format!("{}^{{commit}}", rev)),
            )
            .await?;
        if output.is_success() {
            Ok(Some(output.stdout.trim().to_string()))
        } else {
            Ok(None)
        }
    }
}

#[async_trait]
impl Vcs for SystemGit {
    async fn resolve(&self, rev: &str) -> Result<Option<String>, ToolError> {
        if let Some(sha) = self.rev_parse(rev).await? {
            return Ok(Some(sha));
        }
        // CI checkouts often only carry remote-tracking refs
        let remote_rev = format!("{}/{}", self.remote, rev);
        let sha = self.rev_parse(&remote_rev).await?;
        if sha.is_some() {
            debug!("Resolved {} via {}", rev, remote_rev);
        }
        Ok(sha)
    }

    async fn first_parent(&self, sha: &str) -> Result<Option<String>, ToolError> {
        self.rev_parse(&format!("{}^", sha)).await
    }

    async fn changed_paths(&self, base: &str, head: &str) -> Result<Vec<String>, ToolError> {
        self.lines(
            self.git()
                .args(["diff", "--name-only", "--no-renames"])
                .arg(base)
                .arg(head),
        )
        .await
    }

    async fn tree_paths(&self, sha: &str) -> Result<Vec<String>, ToolError> {
        self.lines(self.git().args(["ls-tree", "-r", "--name-only"]).arg(sha))
            .await
    }

    async fn force_update_branch(&self, branch: &str, sha: &str) -> Result<(), ToolError> {
        let output = self
            .runner
            .run(
                &self
                    .git()
                    .args(["push", "--force"])
                    .arg(&self.remote)
                    .arg(format!("{}:refs/heads/{}", sha, branch)),
            )
            .await?;
        output.into_result("git push")?;
        Ok(())
    }
}
