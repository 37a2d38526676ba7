//! Pipeline configuration from YAML

use crate::core::filter::compile_glob;
use crate::core::condition::Gate;
use crate::core::Pipeline;
use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::Path;

/// Top-level pipeline configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name
    pub name: String,

    /// Pipeline version (optional)
    #[serde(default)]
    pub version: Option<String>,

    /// Which pushes start a run
    #[serde(default)]
    pub trigger: TriggerConfig,

    /// Global variables available to command templates
    #[serde(default)]
    pub variables: HashMap<String, String>,

    /// Secret slot name -> environment variable holding the value
    #[serde(default)]
    pub secrets: BTreeMap<String, String>,

    /// Pipeline jobs
    pub jobs: Vec<JobConfig>,

    /// Default timeout for jobs (in seconds)
    #[serde(default)]
    pub default_timeout_secs: Option<u64>,
}

/// The single accepted trigger: a push on the primary branch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    #[serde(default = "default_event")]
    pub event: String,

    /// Primary branch
    #[serde(default = "default_branch")]
    pub branch: String,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            event: default_event(),
            branch: default_branch(),
        }
    }
}

fn default_event() -> String {
    "push".to_string()
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_true() -> bool {
    true
}

fn default_tag_template() -> String {
    "v{{ version }}".to_string()
}

/// Job configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Unique job identifier
    pub id: String,

    /// Human-readable job name
    #[serde(default)]
    pub name: Option<String>,

    /// Jobs that must succeed before this one starts
    #[serde(default)]
    pub needs: Vec<String>,

    /// Optional gate on a change flag
    #[serde(default)]
    pub when: Option<WhenConfig>,

    /// Timeout for this job (overrides global)
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// What the job does
    #[serde(flatten)]
    pub kind: JobKindConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhenConfig {
    /// `<detect_changes job>.<filter name>`
    pub changed: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKindConfig {
    Guard(GuardConfig),
    DetectChanges(ChangesConfig),
    Release(ReleaseConfig),
    Publish(PublishConfig),
    SyncBranch(SyncConfig),
}

impl JobKindConfig {
    pub fn kind_name(&self) -> &'static str {
        match self {
            JobKindConfig::Guard(_) => "guard",
            JobKindConfig::DetectChanges(_) => "detect_changes",
            JobKindConfig::Release(_) => "release",
            JobKindConfig::Publish(_) => "publish",
            JobKindConfig::SyncBranch(_) => "sync_branch",
        }
    }
}

/// Direction of the owner comparison
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GuardMode {
    /// Abort unless the owner equals the configured value
    #[default]
    Require,
    /// Abort when the owner equals the configured value
    Reject,
}

impl fmt::Display for GuardMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuardMode::Require => f.write_str("require"),
            GuardMode::Reject => f.write_str("reject"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    pub owner: String,

    #[serde(default)]
    pub mode: GuardMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangesConfig {
    /// Base ref; defaults to the push's `before` commit
    #[serde(default)]
    pub base: Option<String>,

    /// Head ref; defaults to the push's `after` commit
    #[serde(default)]
    pub head: Option<String>,

    /// Flag name -> ordered glob patterns
    pub filters: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseConfig {
    /// Dry-run invocation of the versioning tool
    pub version_command: CommandConfig,

    /// Regex with one capture group extracting the version from stdout
    #[serde(default)]
    pub version_pattern: Option<String>,

    /// Tag name template
    #[serde(default = "default_tag_template")]
    pub tag: String,

    /// Release title template (defaults to the tag)
    #[serde(default)]
    pub title: Option<String>,

    #[serde(default = "default_true")]
    pub generate_notes: bool,

    #[serde(default)]
    pub draft: bool,

    /// Directory the version command runs in
    #[serde(default)]
    pub workdir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    /// Distribution channel name (pypi, npm, ...)
    pub channel: String,

    /// Release job providing the descriptor (defaults to the only one in `needs`)
    #[serde(default)]
    pub release: Option<String>,

    #[serde(default)]
    pub workdir: Option<String>,

    /// Environment for every command; values may reference secret slots
    #[serde(default)]
    pub env: BTreeMap<String, EnvConfig>,

    #[serde(default)]
    pub setup: Vec<CommandConfig>,

    #[serde(default)]
    pub build: Vec<CommandConfig>,

    /// Globs (relative to workdir) of files to attach to the release
    #[serde(default)]
    pub artifacts: Vec<String>,

    /// Registry publish command
    #[serde(default)]
    pub publish: Option<CommandConfig>,

    /// Treat "already published" conflicts as success
    #[serde(default = "default_true")]
    pub skip_existing: bool,

    /// Extra regexes identifying a conflict in publish output
    #[serde(default)]
    pub conflict_patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Branch to mirror (defaults to the trigger branch)
    #[serde(default)]
    pub source: Option<String>,

    /// Branch that is force-reset to the source tip
    pub branch: String,

    /// Branch the pull request targets
    pub base: String,

    pub title: String,

    #[serde(default)]
    pub body: String,

    #[serde(default)]
    pub reviewers: Vec<String>,

    #[serde(default)]
    pub assignees: Vec<String>,
}

/// A command as a shell-free argument vector
///
/// The string form is split on whitespace; use the list form when an
/// argument contains spaces.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum CommandConfig {
    Line(String),
    Argv(Vec<String>),
}

impl CommandConfig {
    pub fn argv(&self) -> Vec<String> {
        match self {
            CommandConfig::Line(line) => line.split_whitespace().map(str::to_string).collect(),
            CommandConfig::Argv(argv) => argv.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum EnvConfig {
    Value(String),
    Secret { secret: String },
}

impl PipelineConfig {
    /// Load pipeline configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse pipeline configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn job(&self, id: &str) -> Option<&JobConfig> {
        self.jobs.iter().find(|j| j.id == id)
    }

    /// Validate the pipeline configuration
    pub fn validate(&self) -> Result<()> {
        if self.trigger.event != "push" {
            bail!(
                "Unsupported trigger event '{}': only push is accepted",
                self.trigger.event
            );
        }

        // Check that all job IDs are unique
        let mut seen_ids = HashSet::new();
        for job in &self.jobs {
            if job.id.is_empty() {
                bail!("Job ID must not be empty");
            }
            if !seen_ids.insert(&job.id) {
                bail!("Duplicate job ID: {}", job.id);
            }
        }

        // Check that all dependencies reference existing jobs
        for job in &self.jobs {
            for dep in &job.needs {
                if dep == &job.id {
                    bail!("Job '{}' needs itself", job.id);
                }
                if !seen_ids.contains(dep) {
                    bail!("Job '{}' needs non-existent job '{}'", job.id, dep);
                }
            }
        }

        let guards: Vec<&JobConfig> = self
            .jobs
            .iter()
            .filter(|j| matches!(j.kind, JobKindConfig::Guard(_)))
            .collect();
        if guards.len() > 1 {
            bail!("Only one guard job is allowed, found {}", guards.len());
        }

        for job in &self.jobs {
            self.validate_job(job)
                .with_context(|| format!("Invalid job '{}'", job.id))?;
        }

        for (slot, var) in &self.secrets {
            if var.is_empty() {
                bail!("Secret slot '{}' maps to an empty variable name", slot);
            }
        }

        // Check for cycles in the dependency graph
        self.check_cycles()?;

        if let Some(guard) = guards.first() {
            for job in &self.jobs {
                if job.id != guard.id && !self.depends_on(&job.id, &guard.id) {
                    bail!(
                        "Job '{}' must run after guard job '{}' (add it to needs)",
                        job.id,
                        guard.id
                    );
                }
            }
        }

        Ok(())
    }

    fn validate_job(&self, job: &JobConfig) -> Result<()> {
        if let Some(when) = &job.when {
            let gate = Gate::changed(&when.changed).map_err(anyhow::Error::msg)?;
            if let Gate::Changed { job: source, flag } = &gate {
                if !job.needs.contains(source) {
                    bail!("gate '{}' reads job '{}' which is not in needs", gate, source);
                }
                match self.job(source).map(|j| &j.kind) {
                    Some(JobKindConfig::DetectChanges(changes)) => {
                        if !changes.filters.contains_key(flag) {
                            bail!("gate '{}': job '{}' has no filter '{}'", gate, source, flag);
                        }
                    }
                    _ => bail!("gate '{}': job '{}' is not a detect_changes job", gate, source),
                }
            }
        }

        match &job.kind {
            JobKindConfig::Guard(guard) => {
                if guard.owner.trim().is_empty() {
                    bail!("guard owner must not be empty");
                }
                if job.when.is_some() {
                    bail!("a guard job cannot be gated");
                }
            }
            JobKindConfig::DetectChanges(changes) => {
                if changes.filters.is_empty() {
                    bail!("at least one filter is required");
                }
                for (name, patterns) in &changes.filters {
                    if patterns.is_empty() {
                        bail!("filter '{}' has no patterns", name);
                    }
                    for pattern in patterns {
                        compile_glob(pattern)
                            .with_context(|| format!("filter '{}' pattern '{}'", name, pattern))?;
                    }
                }
            }
            JobKindConfig::Release(release) => {
                if release.version_command.argv().is_empty() {
                    bail!("version_command must not be empty");
                }
                if let Some(pattern) = &release.version_pattern {
                    let regex = Regex::new(pattern)
                        .with_context(|| format!("version_pattern '{}'", pattern))?;
                    if regex.captures_len() < 2 {
                        bail!("version_pattern '{}' needs a capture group", pattern);
                    }
                }
                if release.tag.trim().is_empty() {
                    bail!("tag template must not be empty");
                }
            }
            JobKindConfig::Publish(publish) => {
                if publish.channel.trim().is_empty() {
                    bail!("channel must not be empty");
                }
                self.release_job_for(job, publish)?;
                for command in publish.setup.iter().chain(&publish.build).chain(&publish.publish) {
                    if command.argv().is_empty() {
                        bail!("commands must not be empty");
                    }
                }
                for pattern in &publish.artifacts {
                    compile_glob(pattern).with_context(|| format!("artifact pattern '{}'", pattern))?;
                }
                for pattern in &publish.conflict_patterns {
                    Regex::new(pattern).with_context(|| format!("conflict pattern '{}'", pattern))?;
                }
                for (name, value) in &publish.env {
                    if let EnvConfig::Secret { secret } = value {
                        if !self.secrets.contains_key(secret) {
                            bail!("env '{}' references undeclared secret slot '{}'", name, secret);
                        }
                    }
                }
            }
            JobKindConfig::SyncBranch(sync) => {
                if sync.branch.trim().is_empty() || sync.base.trim().is_empty() {
                    bail!("branch and base must not be empty");
                }
                let source = sync.source.as_deref().unwrap_or(&self.trigger.branch);
                if sync.branch == source {
                    bail!("sync branch '{}' must differ from its source", sync.branch);
                }
                if sync.title.trim().is_empty() {
                    bail!("pull request title must not be empty");
                }
            }
        }

        Ok(())
    }

    /// The release job a publisher reads its descriptor from
    pub fn release_job_for(&self, job: &JobConfig, publish: &PublishConfig) -> Result<String> {
        let is_release = |id: &str| {
            self.job(id)
                .is_some_and(|j| matches!(j.kind, JobKindConfig::Release(_)))
        };

        match &publish.release {
            Some(id) => {
                if !is_release(id) {
                    bail!("release '{}' is not a release job", id);
                }
                if !job.needs.contains(id) {
                    bail!("release job '{}' must be in needs", id);
                }
                Ok(id.clone())
            }
            None => {
                let candidates: Vec<&String> =
                    job.needs.iter().filter(|id| is_release(id)).collect();
                match candidates.as_slice() {
                    [only] => Ok((*only).clone()),
                    [] => bail!("a publish job must need a release job"),
                    _ => bail!("several release jobs in needs; set `release` explicitly"),
                }
            }
        }
    }

    /// Whether `job_id` transitively needs `target`
    fn depends_on(&self, job_id: &str, target: &str) -> bool {
        let mut stack = vec![job_id.to_string()];
        let mut visited = HashSet::new();
        while let Some(id) = stack.pop() {
            if !visited.insert(id.clone()) {
                continue;
            }
            if let Some(job) = self.job(&id) {
                for dep in &job.needs {
                    if dep == target {
                        return true;
                    }
                    stack.push(dep.clone());
                }
            }
        }
        false
    }

    /// Check for cycles in the job dependency graph
    fn check_cycles(&self) -> Result<()> {
        let mut visited = HashSet::new();
        let mut recursion_stack = HashSet::new();

        for job in &self.jobs {
            if !visited.contains(&job.id) {
                self.dfs_check(&job.id, &mut visited, &mut recursion_stack)?;
            }
        }

        Ok(())
    }

    fn dfs_check(
        &self,
        job_id: &str,
        visited: &mut HashSet<String>,
        recursion_stack: &mut HashSet<String>,
    ) -> Result<()> {
        visited.insert(job_id.to_string());
        recursion_stack.insert(job_id.to_string());

        if let Some(job) = self.job(job_id) {
            for dep in &job.needs {
                if recursion_stack.contains(dep) {
                    bail!("Cycle detected in dependency graph involving job '{}'", dep);
                }
                if !visited.contains(dep) {
                    self.dfs_check(dep, visited, recursion_stack)?;
                }
            }
        }

        recursion_stack.remove(job_id);
        Ok(())
    }

    /// Convert config to a Pipeline domain model
    pub fn to_pipeline(&self) -> Result<Pipeline> {
        Pipeline::from_config(self)
    }
}
