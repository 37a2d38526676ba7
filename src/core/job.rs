//! Job domain model

use crate::core::{
    condition::Gate,
    config::{CommandConfig, EnvConfig, GuardMode, JobConfig, JobKindConfig, PipelineConfig},
    filter::{compile_glob, FilterSet},
    state::JobState,
};
use anyhow::{Context, Result};
use globset::GlobMatcher;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

/// Default regex for `bump2version --list` style output
pub const DEFAULT_VERSION_PATTERN: &str = r"current_version=(\S+)";

/// Registry responses to re-uploading a version that is already published
///
/// PyPI rejects the file with an HTTP 400 before saying it exists; npm names
/// the conflict explicitly. Local tool errors mentioning existing files do
/// not match.
pub const DEFAULT_CONFLICT_PATTERNS: &[&str] = &[
    r"(?s)\b400\b.*File already exists",
    r"cannot publish over the previously published versions?",
    r"\bEPUBLISHCONFLICT\b",
];

/// A single job in a pipeline
#[derive(Debug, Clone)]
pub struct Job {
    /// Unique job identifier
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// Jobs that must succeed first
    pub needs: Vec<String>,

    /// Gate evaluated once `needs` have succeeded
    pub gate: Gate,

    /// Component this job runs
    pub kind: JobKind,

    /// Timeout in seconds
    pub timeout_secs: u64,

    /// Runtime state
    pub state: JobState,
}

#[derive(Debug, Clone)]
pub enum JobKind {
    Guard(GuardSpec),
    DetectChanges(ChangesSpec),
    Release(ReleaseSpec),
    Publish(PublishSpec),
    SyncBranch(SyncSpec),
}

impl JobKind {
    pub fn kind_name(&self) -> &'static str {
        match self {
            JobKind::Guard(_) => "guard",
            JobKind::DetectChanges(_) => "detect_changes",
            JobKind::Release(_) => "release",
            JobKind::Publish(_) => "publish",
            JobKind::SyncBranch(_) => "sync_branch",
        }
    }
}

#[derive(Debug, Clone)]
pub struct GuardSpec {
    pub owner: String,
    pub mode: GuardMode,
}

#[derive(Debug, Clone)]
pub struct ChangesSpec {
    pub base: Option<String>,
    pub head: Option<String>,
    pub filters: FilterSet,
}

#[derive(Debug, Clone)]
pub struct ReleaseSpec {
    pub version_command: CommandTemplate,
    pub version_pattern: Regex,
    pub tag_template: String,
    pub title_template: Option<String>,
    pub generate_notes: bool,
    pub draft: bool,
    pub workdir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct PublishSpec {
    pub channel: String,
    /// Job whose release descriptor this publisher uses
    pub release_job: String,
    pub workdir: Option<PathBuf>,
    pub env: Vec<(String, EnvValue)>,
    pub setup: Vec<CommandTemplate>,
    pub build: Vec<CommandTemplate>,
    pub artifacts: Vec<GlobMatcher>,
    pub publish: Option<CommandTemplate>,
    pub skip_existing: bool,
    pub conflict_patterns: Vec<Regex>,
}

#[derive(Debug, Clone)]
pub struct SyncSpec {
    pub source: String,
    pub branch: String,
    pub base: String,
    pub title: String,
    pub body: String,
    pub reviewers: Vec<String>,
    pub assignees: Vec<String>,
}

/// Environment value for a publisher command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvValue {
    Plain(String),
    /// Name of a secret slot, resolved at run time
    Secret(String),
}

/// An argument vector with `{{ var }}` placeholders
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate(Vec<String>);

impl CommandTemplate {
    pub fn new(argv: Vec<String>) -> Self {
        Self(argv)
    }

    pub fn argv(&self) -> &[String] {
        &self.0
    }

    /// Substitute variables into every argument
    pub fn render(&self, variables: &HashMap<String, String>) -> Vec<String> {
        self.0
            .iter()
            .map(|arg| render_template(arg, variables))
            .collect()
    }
}

impl From<&CommandConfig> for CommandTemplate {
    fn from(config: &CommandConfig) -> Self {
        Self(config.argv())
    }
}

/// Replace variables in the form {{ variable_name }}
pub fn render_template(template: &str, variables: &HashMap<String, String>) -> String {
    let mut rendered = template.to_string();
    for (key, value) in variables {
        let placeholder = format!("{{{{ {} }}}}", key);
        rendered = rendered.replace(&placeholder, value);
    }
    rendered
}

/// Defaults applied to every job
#[derive(Debug, Clone)]
pub struct JobDefaults {
    pub timeout_secs: u64,
}

impl Default for JobDefaults {
    fn default() -> Self {
        Self {
            timeout_secs: 600, // 10 minutes
        }
    }
}

impl Job {
    /// Create a job from its config
    pub fn from_config(
        config: &JobConfig,
        pipeline: &PipelineConfig,
        defaults: &JobDefaults,
    ) -> Result<Self> {
        let gate = match &config.when {
            Some(when) => Gate::changed(&when.changed).map_err(anyhow::Error::msg)?,
            None => Gate::Always,
        };

        let kind = match &config.kind {
            JobKindConfig::Guard(guard) => JobKind::Guard(GuardSpec {
                owner: guard.owner.trim().to_string(),
                mode: guard.mode,
            }),
            JobKindConfig::DetectChanges(changes) => JobKind::DetectChanges(ChangesSpec {
                base: changes.base.clone(),
                head: changes.head.clone(),
                filters: FilterSet::compile(&changes.filters)
                    .with_context(|| format!("job '{}' filters", config.id))?,
            }),
            JobKindConfig::Release(release) => {
                let pattern = release
                    .version_pattern
                    .as_deref()
                    .unwrap_or(DEFAULT_VERSION_PATTERN);
                JobKind::Release(ReleaseSpec {
                    version_command: CommandTemplate::from(&release.version_command),
                    version_pattern: Regex::new(pattern)?,
                    tag_template: release.tag.clone(),
                    title_template: release.title.clone(),
                    generate_notes: release.generate_notes,
                    draft: release.draft,
                    workdir: release.workdir.as_ref().map(PathBuf::from),
                })
            }
            JobKindConfig::Publish(publish) => {
                let mut conflict_patterns = Vec::new();
                for pattern in DEFAULT_CONFLICT_PATTERNS
                    .iter()
                    .copied()
                    .chain(publish.conflict_patterns.iter().map(String::as_str))
                {
                    conflict_patterns.push(Regex::new(pattern)?);
                }

                let artifacts = publish
                    .artifacts
                    .iter()
                    .map(|p| compile_glob(p).map(|g| g.compile_matcher()))
                    .collect::<Result<Vec<_>, _>>()?;

                let env = publish
                    .env
                    .iter()
                    .map(|(name, value)| {
                        let value = match value {
                            EnvConfig::Value(v) => EnvValue::Plain(v.clone()),
                            EnvConfig::Secret { secret } => EnvValue::Secret(secret.clone()),
                        };
                        (name.clone(), value)
                    })
                    .collect();

                JobKind::Publish(PublishSpec {
                    channel: publish.channel.clone(),
                    release_job: pipeline.release_job_for(config, publish)?,
                    workdir: publish.workdir.as_ref().map(PathBuf::from),
                    env,
                    setup: publish.setup.iter().map(CommandTemplate::from).collect(),
                    build: publish.build.iter().map(CommandTemplate::from).collect(),
                    artifacts,
                    publish: publish.publish.as_ref().map(CommandTemplate::from),
                    skip_existing: publish.skip_existing,
                    conflict_patterns,
                })
            }
            JobKindConfig::SyncBranch(sync) => JobKind::SyncBranch(SyncSpec {
                source: sync
                    .source
                    .clone()
                    .unwrap_or_else(|| pipeline.trigger.branch.clone()),
                branch: sync.branch.clone(),
                base: sync.base.clone(),
                title: sync.title.clone(),
                body: sync.body.clone(),
                reviewers: sync.reviewers.clone(),
                assignees: sync.assignees.clone(),
            }),
        };

        Ok(Job {
            id: config.id.clone(),
            name: config.name.clone().unwrap_or_else(|| config.id.clone()),
            needs: config.needs.clone(),
            gate,
            kind,
            timeout_secs: config.timeout_secs.unwrap_or(defaults.timeout_secs),
            state: JobState::Pending,
        })
    }

    /// Check if every job in `needs` has succeeded
    pub fn dependencies_met(&self, succeeded: &HashSet<String>) -> bool {
        self.needs.iter().all(|dep| succeeded.contains(dep))
    }

    pub fn is_guard(&self) -> bool {
        matches!(self.kind, JobKind::Guard(_))
    }
}
