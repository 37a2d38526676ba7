//! Run context - trigger metadata and the outputs jobs hand to each other

use crate::core::filter::ChangeSet;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use thiserror::Error;

/// The SHA a push event reports as `before` when the branch is new
pub const NULL_SHA: &str = "0000000000000000000000000000000000000000";

/// Errors while assembling the trigger context
#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("missing trigger field '{0}' (pass it on the command line or set the CI environment)")]
    Missing(&'static str),

    #[error("failed to read event payload {path}: {source}")]
    Payload {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid event payload {path}: {source}")]
    PayloadJson {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Metadata about the push that triggered a run. Immutable once the run starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerContext {
    /// Repository owner identity
    pub owner: String,

    /// `owner/name`, when known
    pub repository: Option<String>,

    /// Event name (`push`, `workflow_dispatch`, ...)
    pub event: String,

    /// Branch the push landed on
    pub branch: String,

    /// Branch tip before the push, if the event carries one
    pub before: Option<String>,

    /// Branch tip after the push
    pub after: String,
}

/// Command-line values that take precedence over the CI environment
#[derive(Debug, Clone, Default)]
pub struct TriggerOverrides {
    pub owner: Option<String>,
    pub repository: Option<String>,
    pub event: Option<String>,
    pub branch: Option<String>,
    pub before: Option<String>,
    pub after: Option<String>,
}

#[derive(Deserialize)]
struct PushPayload {
    before: Option<String>,
}

impl TriggerContext {
    /// Convenience constructor for a push event
    pub fn push(owner: &str, branch: &str, before: Option<&str>, after: &str) -> Self {
        Self {
            owner: owner.to_string(),
            repository: None,
            event: "push".to_string(),
            branch: branch.to_string(),
            before: before.map(str::to_string),
            after: after.to_string(),
        }
    }

    /// Build the trigger from overrides, falling back to the process environment
    pub fn from_env(overrides: &TriggerOverrides) -> Result<Self, TriggerError> {
        Self::resolve(overrides, |name| std::env::var(name).ok())
    }

    /// Build the trigger from overrides and a variable lookup
    ///
    /// Reads `GITHUB_REPOSITORY_OWNER`, `GITHUB_REPOSITORY`, `GITHUB_EVENT_NAME`,
    /// `GITHUB_REF_NAME` (or `GITHUB_REF`), `GITHUB_SHA` and the `before` field
    /// of the JSON payload at `GITHUB_EVENT_PATH`.
    pub fn resolve<F>(overrides: &TriggerOverrides, lookup: F) -> Result<Self, TriggerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.is_empty());

        let repository = overrides
            .repository
            .clone()
            .or_else(|| non_empty("GITHUB_REPOSITORY"));

        let owner = overrides
            .owner
            .clone()
            .or_else(|| non_empty("GITHUB_REPOSITORY_OWNER"))
            .or_else(|| {
                repository
                    .as_deref()
                    .and_then(|r| r.split_once('/'))
                    .map(|(owner, _)| owner.to_string())
            })
            .ok_or(TriggerError::Missing("owner"))?;

        let event = overrides
            .event
            .clone()
            .or_else(|| non_empty("GITHUB_EVENT_NAME"))
            .unwrap_or_else(|| "push".to_string());

        let branch = overrides
            .branch
            .clone()
            .or_else(|| non_empty("GITHUB_REF_NAME"))
            .or_else(|| {
                non_empty("GITHUB_REF")
                    .and_then(|r| r.strip_prefix("refs/heads/").map(str::to_string))
            })
            .ok_or(TriggerError::Missing("branch"))?;

        let after = overrides
            .after
            .clone()
            .or_else(|| non_empty("GITHUB_SHA"))
            .ok_or(TriggerError::Missing("after"))?;

        let before = match &overrides.before {
            Some(before) => Some(before.clone()),
            None => match non_empty("GITHUB_EVENT_PATH") {
                Some(path) => read_payload_before(PathBuf::from(path))?,
                None => None,
            },
        };

        Ok(Self {
            owner,
            repository,
            event,
            branch,
            before,
            after,
        })
    }

    pub fn is_push(&self) -> bool {
        self.event == "push"
    }

    /// The `before` commit, unless the push created the branch
    pub fn before_commit(&self) -> Option<&str> {
        self.before
            .as_deref()
            .filter(|sha| !sha.is_empty() && !sha.chars().all(|c| c == '0'))
    }

    /// Variables exposed to command templates
    pub fn template_variables(&self) -> HashMap<String, String> {
        let mut vars = HashMap::new();
        vars.insert("trigger.owner".to_string(), self.owner.clone());
        vars.insert("trigger.event".to_string(), self.event.clone());
        vars.insert("trigger.branch".to_string(), self.branch.clone());
        vars.insert("trigger.sha".to_string(), self.after.clone());
        if let Some(repository) = &self.repository {
            vars.insert("trigger.repository".to_string(), repository.clone());
        }
        if let Some(before) = &self.before {
            vars.insert("trigger.before".to_string(), before.clone());
        }
        vars
    }
}

fn read_payload_before(path: PathBuf) -> Result<Option<String>, TriggerError> {
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(source) => return Err(TriggerError::Payload { path, source }),
    };
    match serde_json::from_str::<PushPayload>(&content) {
        Ok(payload) => Ok(payload.before),
        Err(source) => Err(TriggerError::PayloadJson { path, source }),
    }
}

/// Output of the release coordinator, read-only once produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseDescriptor {
    pub version: String,
    pub tag_name: String,
    pub upload_url: String,
}

/// How a publisher finished
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishStatus {
    Published,
    /// The registry already had this version
    AlreadyPublished,
    /// No publish command configured; artifacts were only attached to the release
    UploadOnly,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishOutcome {
    pub channel: String,
    pub version: String,
    pub status: PublishStatus,
    /// Assets attached to the release by this run
    pub uploaded: Vec<String>,
    /// Assets the release already carried
    pub existing: Vec<String>,
}

/// A pull request on the hosting platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: Option<u64>,
    pub url: String,
    /// False when an identical open pull request was reused
    pub created: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub branch: String,
    pub sha: String,
    pub pull_request: PullRequest,
}

/// Typed output of a finished job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobOutput {
    GuardPassed { owner: String },
    Changes(ChangeSet),
    Release(ReleaseDescriptor),
    Published(PublishOutcome),
    Synced(SyncOutcome),
}

impl JobOutput {
    /// String view of the output for command templates
    pub fn values(&self) -> BTreeMap<String, String> {
        let mut values = BTreeMap::new();
        match self {
            JobOutput::GuardPassed { owner } => {
                values.insert("owner".to_string(), owner.clone());
            }
            JobOutput::Changes(changes) => {
                for (flag, value) in &changes.flags {
                    values.insert(flag.clone(), value.to_string());
                }
            }
            JobOutput::Release(release) => {
                values.insert("version".to_string(), release.version.clone());
                values.insert("tag_name".to_string(), release.tag_name.clone());
                values.insert("upload_url".to_string(), release.upload_url.clone());
            }
            JobOutput::Published(outcome) => {
                values.insert("channel".to_string(), outcome.channel.clone());
                values.insert("version".to_string(), outcome.version.clone());
            }
            JobOutput::Synced(outcome) => {
                values.insert("sha".to_string(), outcome.sha.clone());
                values.insert("pull_request".to_string(), outcome.pull_request.url.clone());
            }
        }
        values
    }

    /// One-line description for console output
    pub fn summary(&self) -> String {
        match self {
            JobOutput::GuardPassed { owner } => format!("owner {} accepted", owner),
            JobOutput::Changes(changes) => {
                let flags: Vec<String> = changes
                    .flags
                    .iter()
                    .map(|(name, value)| format!("{}={}", name, value))
                    .collect();
                format!("{} paths changed ({})", changes.paths.len(), flags.join(", "))
            }
            JobOutput::Release(release) => {
                format!("released {} as {}", release.version, release.tag_name)
            }
            JobOutput::Published(outcome) => match outcome.status {
                PublishStatus::Published => {
                    format!("published {} {}", outcome.channel, outcome.version)
                }
                PublishStatus::AlreadyPublished => format!(
                    "{} {} already published, skipped",
                    outcome.channel, outcome.version
                ),
                PublishStatus::UploadOnly => format!(
                    "attached {} asset(s) to release",
                    outcome.uploaded.len()
                ),
            },
            JobOutput::Synced(outcome) => {
                let pr = if outcome.pull_request.created {
                    "opened"
                } else {
                    "reused"
                };
                format!(
                    "{} reset to {}, {} {}",
                    outcome.branch,
                    short_sha(&outcome.sha),
                    pr,
                    outcome.pull_request.url
                )
            }
        }
    }
}

pub fn short_sha(sha: &str) -> &str {
    sha.get(..8).unwrap_or(sha)
}

/// Execution context handed to a job
///
/// Contains the trigger, pipeline variables, and the outputs of the jobs the
/// current job declared in `needs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunContext {
    pub trigger: TriggerContext,

    /// Global and user-defined variables
    pub variables: HashMap<String, String>,

    /// Outputs from upstream jobs (job_id -> output)
    pub outputs: HashMap<String, JobOutput>,

    /// The job being executed
    pub current_job_id: Option<String>,
}

impl RunContext {
    pub fn new(trigger: TriggerContext) -> Self {
        Self {
            trigger,
            variables: HashMap::new(),
            outputs: HashMap::new(),
            current_job_id: None,
        }
    }

    pub fn set_output(&mut self, job_id: &str, output: JobOutput) {
        self.outputs.insert(job_id.to_string(), output);
    }

    pub fn output(&self, job_id: &str) -> Option<&JobOutput> {
        self.outputs.get(job_id)
    }

    pub fn release(&self, job_id: &str) -> Option<&ReleaseDescriptor> {
        match self.outputs.get(job_id) {
            Some(JobOutput::Release(release)) => Some(release),
            _ => None,
        }
    }

    /// All variables available for template rendering
    ///
    /// Upstream outputs appear as `needs.<job>.<key>`; a release descriptor
    /// is additionally exposed as bare `version`, `tag_name` and `upload_url`.
    pub fn get_rendering_variables(&self) -> HashMap<String, String> {
        let mut vars = self.variables.clone();
        vars.extend(self.trigger.template_variables());

        for (job_id, output) in &self.outputs {
            for (key, value) in output.values() {
                vars.insert(format!("needs.{}.{}", job_id, key), value);
            }
            if let JobOutput::Release(release) = output {
                vars.insert("version".to_string(), release.version.clone());
                vars.insert("tag_name".to_string(), release.tag_name.clone());
                vars.insert("upload_url".to_string(), release.upload_url.clone());
            }
        }

        if let Some(ref current) = self.current_job_id {
            vars.insert("current_job".to_string(), current.clone());
        }

        vars
    }
}
