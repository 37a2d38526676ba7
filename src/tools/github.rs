//! Release hosting collaborator

use crate::core::context::{PullRequest, ReleaseDescriptor};
use crate::tools::{Invocation, ToolError, ToolRunner};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Request to publish a release
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseRequest {
    pub tag_name: String,
    pub title: String,
    /// Commit the tag points at
    pub target: String,
    pub generate_notes: bool,
    pub draft: bool,
}

/// A release as reported by the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedRelease {
    pub tag_name: String,
    pub upload_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded,
    /// An asset with this name is already attached
    AlreadyExists,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestRequest {
    pub head: String,
    pub base: String,
    pub title: String,
    pub body: String,
    pub reviewers: Vec<String>,
    pub assignees: Vec<String>,
}

/// Releases, assets and pull requests on the hosting platform
#[async_trait]
pub trait ReleaseHost: Send + Sync {
    /// Publish a release for the tag; an existing release with that tag is returned as is
    async fn publish_release(&self, request: &ReleaseRequest) -> Result<PublishedRelease, ToolError>;

    async fn upload_asset(
        &self,
        release: &ReleaseDescriptor,
        path: &Path,
    ) -> Result<UploadOutcome, ToolError>;

    /// Open a pull request, or return the open one with the same head and base
    async fn open_pull_request(&self, request: &PullRequestRequest) -> Result<PullRequest, ToolError>;
}

/// `ReleaseHost` backed by the GitHub CLI
pub struct GhCli {
    runner: Arc<dyn ToolRunner>,
    repo_dir: PathBuf,
    /// `owner/name`; `gh` infers it from the checkout when unset
    repository: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GhRelease {
    tag_name: String,
    upload_url: String,
}

#[derive(Deserialize)]
struct GhPullRequest {
    number: u64,
    url: String,
}

impl GhCli {
    pub fn new(runner: Arc<dyn ToolRunner>, repo_dir: PathBuf, repository: Option<String>) -> Self {
        Self {
            runner,
            repo_dir,
            repository,
        }
    }

    fn gh(&self) -> Invocation {
        let invocation = Invocation::new("gh").current_dir(&self.repo_dir);
        match &self.repository {
            Some(repo) => invocation.env("GH_REPO", repo.clone()),
            None => invocation,
        }
    }
}

impl GhCli {
    /// The release for `tag`, or `None` if the host has none
    async fn view_release(&self, tag: &str) -> Result<Option<PublishedRelease>, ToolError> {
        let view = self
            .gh()
            .args(["release", "view"])
            .arg(tag)
            .args(["--json", "tagName,uploadUrl"]);
        let output = self.runner.run(&view).await?;
        if !output.is_success() {
            return Ok(None);
        }

        let release: GhRelease =
            serde_json::from_str(&output.stdout).map_err(|e| ToolError::InvalidOutput {
                program: "gh release view".to_string(),
                message: e.to_string(),
            })?;
        Ok(Some(PublishedRelease {
            tag_name: release.tag_name,
            upload_url: release.upload_url,
        }))
    }
}

/// Parse the trailing `/pull/<n>` of a pull request URL
pub(crate) fn pull_number(url: &str) -> Option<u64> {
    url.trim_end_matches('/').rsplit('/').next()?.parse().ok()
}

#[async_trait]
impl ReleaseHost for GhCli {
    async fn publish_release(&self, request: &ReleaseRequest) -> Result<PublishedRelease, ToolError> {
        if let Some(existing) = self.view_release(&request.tag_name).await? {
            info!("Release {} already exists, reusing it", request.tag_name);
            return Ok(existing);
        }

        let mut create = self
            .gh()
            .args(["release", "create"])
            .arg(&request.tag_name)
            .arg("--title")
            .arg(&request.title)
            .arg("--target")
            .arg(&request.target);
        if request.generate_notes {
            create = create.arg("--generate-notes");
        }
        if request.draft {
            create = create.arg("--draft");
        }
        self.runner.run(&create).await?.into_result("gh release create")?;
        info!("Created release {}", request.tag_name);

        self.view_release(&request.tag_name)
            .await?
            .ok_or_else(|| ToolError::InvalidOutput {
                program: "gh release view".to_string(),
                message: format!("release {} not found after creating it", request.tag_name),
            })
    }

    async fn upload_asset(
        &self,
        release: &ReleaseDescriptor,
        path: &Path,
    ) -> Result<UploadOutcome, ToolError> {
        let upload = self
            .gh()
            .args(["release", "upload"])
            .arg(&release.tag_name)
            .arg(path.to_string_lossy());
        let output = self.runner.run(&upload).await?;

        if output.is_success() {
            return Ok(UploadOutcome::Uploaded);
        }
        if output.stderr.to_lowercase().contains("already exists") {
            debug!("Asset {} already attached to {}", path.display(), release.tag_name);
            return Ok(UploadOutcome::AlreadyExists);
        }
        output.into_result("gh release upload")?;
        Ok(UploadOutcome::Uploaded)
    }

    async fn open_pull_request(&self, request: &PullRequestRequest) -> Result<PullRequest, ToolError> {
        let list = self
            .gh()
            .args(["pr", "list", "--state", "open", "--head"])
            .arg(&request.head)
            .arg("--base")
            .arg(&request.base)
            .args(["--json", "number,url"]);
        let output = self.runner.run(&list).await?.into_result("gh pr list")?;
        let open: Vec<GhPullRequest> =
            serde_json::from_str(&output.stdout).map_err(|e| ToolError::InvalidOutput {
                program: "gh pr list".to_string(),
                message: e.to_string(),
            })?;

        if let Some(existing) = open.into_iter().next() {
            info!("Pull request #{} already open", existing.number);
            return Ok(PullRequest {
                number: Some(existing.number),
                url: existing.url,
                created: false,
            });
        }

        let mut create = self
            .gh()
            .args(["pr", "create", "--head"])
            .arg(&request.head)
            .arg("--base")
            .arg(&request.base)
            .arg("--title")
            .arg(&request.title)
            .arg("--body")
            .arg(&request.body);
        for reviewer in &request.reviewers {
            create = create.arg("--reviewer").arg(reviewer);
        }
        for assignee in &request.assignees {
            create = create.arg("--assignee").arg(assignee);
        }
        let output = self.runner.run(&create).await?.into_result("gh pr create")?;

        let url = output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| l.starts_with("http"))
            .last()
            .ok_or_else(|| ToolError::InvalidOutput {
                program: "gh pr create".to_string(),
                message: "no pull request URL in output".to_string(),
            })?
            .to_string();

        Ok(PullRequest {
            number: pull_number(&url),
            url,
            created: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolOutput;
    use std::collections::VecDeque;
    use tokio::sync::Mutex;

    /// Replays canned outputs and records every invocation
    struct ScriptedRunner {
        outputs: Mutex<VecDeque<ToolOutput>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        fn new(outputs: Vec<ToolOutput>) -> Arc<Self> {
            Arc::new(Self {
                outputs: Mutex::new(outputs.into()),
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ToolRunner for ScriptedRunner {
        async fn run(&self, invocation: &Invocation) -> Result<ToolOutput, ToolError> {
            self.calls.lock().await.push(invocation.to_string());
            Ok(self
                .outputs
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| ToolOutput::success("")))
        }
    }

    fn descriptor() -> ReleaseDescriptor {
        ReleaseDescriptor {
            version: "4.1.2".to_string(),
            tag_name: "v4.1.2".to_string(),
            upload_url: "https://uploads.github.com/repos/x/y/releases/1/assets{?name,label}"
                .to_string(),
        }
    }

    #[test]
    fn test_pull_number() {
        assert_eq!(pull_number("https://github.com/o/r/pull/1234"), Some(1234));
        assert_eq!(pull_number("https://github.com/o/r/pull/12/"), Some(12));
        assert_eq!(pull_number("not a url"), None);
    }

    #[tokio::test]
    async fn test_publish_release_reads_descriptor() {
        let runner = ScriptedRunner::new(vec![
            ToolOutput::failure(1, "release not found"),
            ToolOutput::success("https://github.com/o/r/releases/tag/v4.1.2\n"),
            ToolOutput::success(
                r#"{"tagName":"v4.1.2","uploadUrl":"https://uploads.github.com/repos/o/r/releases/9/assets{?name,label}"}"#,
            ),
        ]);
        let gh = GhCli::new(runner.clone(), PathBuf::from("."), Some("o/r".to_string()));

        let release = gh
            .publish_release(&ReleaseRequest {
                tag_name: "v4.1.2".to_string(),
                title: "v4.1.2".to_string(),
                target: "abc".to_string(),
                generate_notes: true,
                draft: false,
            })
            .await
            .unwrap();

        assert_eq!(release.tag_name, "v4.1.2");
        assert!(release.upload_url.contains("/releases/9/assets"));

        let calls = runner.calls.lock().await;
        assert_eq!(calls[0], "gh release view v4.1.2 --json tagName,uploadUrl");
        assert_eq!(
            calls[1],
            "gh release create v4.1.2 --title v4.1.2 --target abc --generate-notes"
        );
        assert_eq!(calls.len(), 3);
    }

    #[tokio::test]
    async fn test_existing_release_is_reused() {
        let runner = ScriptedRunner::new(vec![ToolOutput::success(
            r#"{"tagName":"v4.1.2","uploadUrl":"https://uploads.github.com/repos/o/r/releases/9/assets"}"#,
        )]);
        let gh = GhCli::new(runner.clone(), PathBuf::from("."), None);

        let release = gh
            .publish_release(&ReleaseRequest {
                tag_name: "v4.1.2".to_string(),
                title: "v4.1.2".to_string(),
                target: "abc".to_string(),
                generate_notes: false,
                draft: false,
            })
            .await
            .unwrap();

        assert_eq!(release.tag_name, "v4.1.2");
        assert_eq!(runner.calls.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_upload_conflict_is_reported() {
        let runner = ScriptedRunner::new(vec![ToolOutput::failure(
            1,
            "asset under the same name already exists: [dist.tar.gz]",
        )]);
        let gh = GhCli::new(runner, PathBuf::from("."), None);
        let outcome = gh
            .upload_asset(&descriptor(), Path::new("dist.tar.gz"))
            .await
            .unwrap();
        assert_eq!(outcome, UploadOutcome::AlreadyExists);
    }

    #[tokio::test]
    async fn test_upload_failure_is_error() {
        let runner = ScriptedRunner::new(vec![ToolOutput::failure(1, "HTTP 401: Bad credentials")]);
        let gh = GhCli::new(runner, PathBuf::from("."), None);
        assert!(gh
            .upload_asset(&descriptor(), Path::new("dist.tar.gz"))
            .await
            .is_err());
    }

    fn sync_request() -> PullRequestRequest {
        PullRequestRequest {
            head: "bot/sync-main-dev".to_string(),
            base: "dev".to_string(),
            title: "chore: sync main->dev".to_string(),
            body: "Syncing main->dev".to_string(),
            reviewers: vec!["krivard".to_string()],
            assignees: vec![],
        }
    }

    #[tokio::test]
    async fn test_existing_pull_request_is_reused() {
        let runner = ScriptedRunner::new(vec![ToolOutput::success(
            r#"[{"number": 42, "url": "https://github.com/o/r/pull/42"}]"#,
        )]);
        let gh = GhCli::new(runner.clone(), PathBuf::from("."), None);

        let pr = gh.open_pull_request(&sync_request()).await.unwrap();
        assert!(!pr.created);
        assert_eq!(pr.number, Some(42));
        assert_eq!(runner.calls.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_new_pull_request_is_created() {
        let runner = ScriptedRunner::new(vec![
            ToolOutput::success("[]"),
            ToolOutput::success("https://github.com/o/r/pull/43\n"),
        ]);
        let gh = GhCli::new(runner.clone(), PathBuf::from("."), None);

        let pr = gh.open_pull_request(&sync_request()).await.unwrap();
        assert!(pr.created);
        assert_eq!(pr.number, Some(43));

        let calls = runner.calls.lock().await;
        assert!(calls[1].starts_with("gh pr create --head bot/sync-main-dev --base dev"));
        assert!(calls[1].ends_with("--reviewer krivard"));
    }
}
