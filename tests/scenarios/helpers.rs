//! In-memory collaborators and a harness that runs whole pipelines against them

use async_trait::async_trait;
use release_gate::core::config::PipelineConfig;
use release_gate::core::secret::SecretStore;
use release_gate::core::{
    ExecutionStatus, JobOutput, JobState, Pipeline, PublishOutcome, PullRequest,
    ReleaseDescriptor, SkipReason, TriggerContext,
};
use release_gate::execution::{ExecutionEngine, ExecutionEvent, JobExecutor, SchedulingStrategy};
use release_gate::tools::{
    Collaborators, Invocation, PublishedRelease, PullRequestRequest, ReleaseHost, ReleaseRequest,
    ToolError, ToolOutput, ToolRunner, UploadOutcome, Vcs,
};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const OWNER: &str = "cmu-delphi";
pub const VERSION: &str = "4.1.0";
pub const PYPI_ARTIFACTS: &[&str] = &[
    "delphi_epidata-4.1.0-py3-none-any.whl",
    "delphi_epidata-4.1.0.tar.gz",
];
pub const NPM_ARTIFACT: &str = "delphi_epidata-4.1.0.tgz";

/// The release pipeline of a client library: guard, change detection,
/// release, a gated python publisher, an ungated JS publisher and a
/// main->dev sync
pub const RELEASE_HELPER: &str = r#"
name: "release-helper"
trigger:
  branch: main

secrets:
  pypi_token: PYPI_API_TOKEN
  npm_token: NPM_TOKEN

jobs:
  - id: correct_repository
    guard:
      owner: cmu-delphi

  - id: client_changed
    needs: [correct_repository]
    detect_changes:
      filters:
        python:
          - src/client/delphi_epidata.py
          - src/client/packaging/pypi/**

  - id: create_release
    needs: [correct_repository]
    release:
      version_command: "bump2version --dry-run --list major"
      version_pattern: 'current_version=(\S+)'
      generate_notes: true

  - id: release_python_client
    needs: [client_changed, create_release]
    when:
      changed: client_changed.python
    publish:
      channel: pypi
      workdir: src/client/packaging/pypi
      env:
        TWINE_USERNAME: __token__
        TWINE_PASSWORD:
          secret: pypi_token
      build:
        - ["python", "-m", "build"]
      artifacts: ["dist/*"]
      publish: "twine upload dist/*"

  - id: release_js_client
    needs: [create_release]
    publish:
      channel: npm
      workdir: src/client/packaging/npm
      env:
        NODE_AUTH_TOKEN:
          secret: npm_token
      build: ["npm ci", "npm test", "npm pack"]
      artifacts: ["*.tgz"]
      publish: "npm publish --access public"

  - id: sync_dev
    needs: [correct_repository]
    sync_branch:
      branch: bot/sync-main-dev
      base: dev
      title: "chore: sync main->dev"
      body: "Syncing main->dev"
      reviewers: [krivard]
"#;

/// Linear history with named branches
pub struct FakeVcs {
    commits: Vec<(String, Vec<String>)>,
    branches: Mutex<HashMap<String, String>>,
    pushes: Mutex<Vec<(String, String)>>,
}

impl FakeVcs {
    /// A repository whose first commit `c0` holds the client sources, on `main` and `dev`
    pub fn new() -> Self {
        let root = vec![
            "README.md".to_string(),
            "src/client/delphi_epidata.py".to_string(),
            "src/client/packaging/npm/package.json".to_string(),
            "src/client/packaging/pypi/setup.py".to_string(),
        ];
        Self {
            commits: vec![("c0".to_string(), root)],
            branches: Mutex::new(HashMap::from([
                ("main".to_string(), "c0".to_string()),
                ("dev".to_string(), "c0".to_string()),
            ])),
            pushes: Mutex::new(Vec::new()),
        }
    }

    /// Add a commit touching `paths` on top of `main`
    pub fn commit(mut self, sha: &str, paths: &[&str]) -> Self {
        self.commits
            .push((sha.to_string(), paths.iter().map(|p| p.to_string()).collect()));
        self.branches
            .lock()
            .unwrap()
            .insert("main".to_string(), sha.to_string());
        self
    }

    pub fn branch_tip(&self, branch: &str) -> Option<String> {
        self.branches.lock().unwrap().get(branch).cloned()
    }

    /// Every `(branch, sha)` force-pushed so far
    pub fn pushes(&self) -> Vec<(String, String)> {
        self.pushes.lock().unwrap().clone()
    }

    fn index(&self, sha: &str) -> Option<usize> {
        self.commits.iter().position(|(s, _)| s == sha)
    }

    fn paths_in(&self, range: std::ops::RangeInclusive<usize>) -> Vec<String> {
        let paths: BTreeSet<String> = self.commits[range]
            .iter()
            .flat_map(|(_, paths)| paths.iter().cloned())
            .collect();
        paths.into_iter().collect()
    }
}

fn unknown(rev: &str) -> ToolError {
    ToolError::Failed {
        program: "git".to_string(),
        code: 128,
        stderr: format!("fatal: bad revision '{}'", rev),
    }
}

#[async_trait]
impl Vcs for FakeVcs {
    async fn resolve(&self, rev: &str) -> Result<Option<String>, ToolError> {
        if let Some(sha) = self.branch_tip(rev) {
            return Ok(Some(sha));
        }
        Ok(self.index(rev).map(|_| rev.to_string()))
    }

    async fn first_parent(&self, sha: &str) -> Result<Option<String>, ToolError> {
        let index = self.index(sha).ok_or_else(|| unknown(sha))?;
        Ok(index.checked_sub(1).map(|i| self.commits[i].0.clone()))
    }

    async fn changed_paths(&self, base: &str, head: &str) -> Result<Vec<String>, ToolError> {
        let base = self.index(base).ok_or_else(|| unknown(base))?;
        let head = self.index(head).ok_or_else(|| unknown(head))?;
        if base >= head {
            return Ok(vec![]);
        }
        Ok(self.paths_in(base + 1..=head))
    }

    async fn tree_paths(&self, sha: &str) -> Result<Vec<String>, ToolError> {
        let head = self.index(sha).ok_or_else(|| unknown(sha))?;
        Ok(self.paths_in(0..=head))
    }

    async fn force_update_branch(&self, branch: &str, sha: &str) -> Result<(), ToolError> {
        self.branches
            .lock()
            .unwrap()
            .insert(branch.to_string(), sha.to_string());
        self.pushes
            .lock()
            .unwrap()
            .push((branch.to_string(), sha.to_string()));
        Ok(())
    }
}

/// Releases, assets and pull requests kept in memory
#[derive(Default)]
pub struct FakeHost {
    releases: Mutex<BTreeMap<String, ReleaseRequest>>,
    assets: Mutex<BTreeMap<String, Vec<String>>>,
    pulls: Mutex<Vec<PullRequestRequest>>,
}

impl FakeHost {
    pub fn releases(&self) -> Vec<ReleaseRequest> {
        self.releases.lock().unwrap().values().cloned().collect()
    }

    pub fn assets(&self, tag: &str) -> Vec<String> {
        let mut assets = self
            .assets
            .lock()
            .unwrap()
            .get(tag)
            .cloned()
            .unwrap_or_default();
        assets.sort();
        assets
    }

    pub fn pull_requests(&self) -> Vec<PullRequestRequest> {
        self.pulls.lock().unwrap().clone()
    }
}

fn pull_url(number: usize) -> String {
    format!("https://github.com/cmu-delphi/delphi-epidata/pull/{}", number)
}

#[async_trait]
impl ReleaseHost for FakeHost {
    async fn publish_release(&self, request: &ReleaseRequest) -> Result<PublishedRelease, ToolError> {
        self.releases
            .lock()
            .unwrap()
            .entry(request.tag_name.clone())
            .or_insert_with(|| request.clone());
        Ok(PublishedRelease {
            tag_name: request.tag_name.clone(),
            upload_url: format!(
                "https://uploads.github.com/repos/cmu-delphi/delphi-epidata/releases/{}/assets{{?name,label}}",
                request.tag_name
            ),
        })
    }

    async fn upload_asset(
        &self,
        release: &ReleaseDescriptor,
        path: &Path,
    ) -> Result<UploadOutcome, ToolError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut assets = self.assets.lock().unwrap();
        let attached = assets.entry(release.tag_name.clone()).or_default();
        if attached.contains(&name) {
            return Ok(UploadOutcome::AlreadyExists);
        }
        attached.push(name);
        Ok(UploadOutcome::Uploaded)
    }

    async fn open_pull_request(&self, request: &PullRequestRequest) -> Result<PullRequest, ToolError> {
        let mut pulls = self.pulls.lock().unwrap();
        if let Some(index) = pulls
            .iter()
            .position(|p| p.head == request.head && p.base == request.base)
        {
            return Ok(PullRequest {
                number: Some(index as u64 + 1),
                url: pull_url(index + 1),
                created: false,
            });
        }
        pulls.push(request.clone());
        Ok(PullRequest {
            number: Some(pulls.len() as u64),
            url: pull_url(pulls.len()),
            created: true,
        })
    }
}

/// One recorded external command
#[derive(Debug, Clone)]
pub struct Call {
    pub line: String,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub secret_env: Vec<String>,
}

/// Build and publish tools; package registries remember what they received
#[derive(Default)]
pub struct FakeRunner {
    fail_version: bool,
    registries: Mutex<HashSet<String>>,
    calls: Mutex<Vec<Call>>,
}

impl FakeRunner {
    /// A version tool that exits non-zero
    pub fn failing_version() -> Self {
        Self {
            fail_version: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls whose command line starts with `prefix`
    pub fn calls_to(&self, prefix: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.line.starts_with(prefix))
            .collect()
    }

    fn publish(&self, registry: &str, conflict: &str) -> ToolOutput {
        if self.registries.lock().unwrap().insert(registry.to_string()) {
            ToolOutput::success(format!("published {}", VERSION))
        } else {
            ToolOutput::failure(1, conflict)
        }
    }
}

#[async_trait]
impl ToolRunner for FakeRunner {
    async fn run(&self, invocation: &Invocation) -> Result<ToolOutput, ToolError> {
        self.calls.lock().unwrap().push(Call {
            line: invocation.to_string(),
            cwd: invocation.cwd.clone(),
            env: invocation.env.clone(),
            secret_env: invocation.secret_env.iter().map(|(k, _)| k.clone()).collect(),
        });

        let args: Vec<&str> = invocation.args.iter().map(String::as_str).collect();
        let output = match (invocation.program.as_str(), args.as_slice()) {
            ("bump2version", _) if self.fail_version => {
                ToolOutput::failure(1, "bumpversion: no configuration file found")
            }
            ("bump2version", _) => ToolOutput::success(format!(
                "current_version={}\nnew_version=5.0.0\n",
                VERSION
            )),
            ("twine", ["upload", ..]) => self.publish(
                "pypi",
                "HTTPError: 400 Bad Request from https://upload.pypi.org/legacy/\nFile already exists.",
            ),
            ("npm", ["publish", ..]) => self.publish(
                "npm",
                "npm ERR! 403 You cannot publish over the previously published versions: 4.1.0.",
            ),
            _ => ToolOutput::success(""),
        };
        Ok(output)
    }
}

/// Collaborators plus a checkout holding prebuilt artifacts
pub struct Harness {
    pub vcs: Arc<FakeVcs>,
    pub host: Arc<FakeHost>,
    pub runner: Arc<FakeRunner>,
    pub workspace: TempDir,
}

impl Harness {
    pub fn new(vcs: FakeVcs) -> Self {
        Self::with_runner(vcs, FakeRunner::default())
    }

    pub fn with_runner(vcs: FakeVcs, runner: FakeRunner) -> Self {
        let workspace = tempfile::tempdir().unwrap();
        let pypi_dist = workspace.path().join("src/client/packaging/pypi/dist");
        let npm = workspace.path().join("src/client/packaging/npm");
        std::fs::create_dir_all(&pypi_dist).unwrap();
        std::fs::create_dir_all(npm.join("node_modules/left-pad")).unwrap();
        for name in PYPI_ARTIFACTS {
            std::fs::write(pypi_dist.join(name), b"artifact").unwrap();
        }
        std::fs::write(npm.join(NPM_ARTIFACT), b"artifact").unwrap();
        std::fs::write(npm.join("node_modules/left-pad/left-pad-1.3.0.tgz"), b"dependency").unwrap();

        Self {
            vcs: Arc::new(vcs),
            host: Arc::new(FakeHost::default()),
            runner: Arc::new(runner),
            workspace,
        }
    }

    /// Run `yaml` once for `trigger`
    pub async fn run(&self, yaml: &str, trigger: &TriggerContext) -> RunResult {
        let mut pipeline = PipelineConfig::from_yaml(yaml)
            .unwrap()
            .to_pipeline()
            .unwrap();
        let secrets = SecretStore::from_lookup(&pipeline.secrets, |var| {
            Some(format!("{}-secret-value", var.to_lowercase()))
        });
        let collaborators = Collaborators {
            runner: self.runner.clone(),
            vcs: self.vcs.clone(),
            host: self.host.clone(),
        };
        let executor = JobExecutor::new(collaborators, secrets, self.workspace.path().to_path_buf());
        let engine = ExecutionEngine::new(executor, SchedulingStrategy::Parallel);

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        engine
            .add_event_handler(move |event| sink.lock().unwrap().push(event))
            .await;

        let status = engine.execute(&mut pipeline, trigger).await.unwrap();
        let events = events.lock().unwrap().clone();
        RunResult {
            pipeline,
            status,
            events,
        }
    }
}

/// A push of `after` onto main by the expected owner
pub fn push(before: &str, after: &str) -> TriggerContext {
    TriggerContext::push(OWNER, "main", Some(before), after)
}

pub struct RunResult {
    pub pipeline: Pipeline,
    pub status: ExecutionStatus,
    pub events: Vec<ExecutionEvent>,
}

impl RunResult {
    pub fn state(&self, job_id: &str) -> &JobState {
        &self
            .pipeline
            .job(job_id)
            .unwrap_or_else(|| panic!("no job {}", job_id))
            .state
    }

    pub fn succeeded(&self, job_id: &str) -> bool {
        self.state(job_id).is_success()
    }

    pub fn skip_reason(&self, job_id: &str) -> Option<&SkipReason> {
        match self.state(job_id) {
            JobState::Skipped { reason } => Some(reason),
            _ => None,
        }
    }

    pub fn error(&self, job_id: &str) -> Option<&str> {
        match self.state(job_id) {
            JobState::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn published(&self, job_id: &str) -> &PublishOutcome {
        match self.state(job_id).output() {
            Some(JobOutput::Published(outcome)) => outcome,
            other => panic!("{} did not publish: {:?}", job_id, other),
        }
    }

    /// Jobs that emitted `JobStarted`, in order
    pub fn started(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|e| match e {
                ExecutionEvent::JobStarted { job_id } => Some(job_id.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn summary(&self) -> String {
        let mut ids: Vec<&String> = self.pipeline.jobs.keys().collect();
        ids.sort();
        ids.iter()
            .map(|id| format!("{}: {:?}", id, self.state(id)))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
