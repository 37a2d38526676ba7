//! CLI command definitions

use crate::core::TriggerOverrides;
use crate::execution::SchedulingStrategy;
use crate::tools::Collaborators;
use clap::Args;
use std::path::PathBuf;

/// Run the pipeline for a push
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Variable overrides (key=value)
    #[arg(long, value_parser = parse_key_value)]
    pub variable: Vec<(String, String)>,

    /// Scheduling strategy: sequential, parallel or parallel:<n>
    #[arg(long, default_value_t = SchedulingStrategy::Parallel)]
    pub strategy: SchedulingStrategy,

    /// Don't save the run to history
    #[arg(long)]
    pub no_history: bool,

    #[command(flatten)]
    pub trigger: TriggerArgs,

    #[command(flatten)]
    pub tools: ToolArgs,
}

/// Validate a pipeline configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show the execution plan
#[derive(Debug, Args, Clone)]
pub struct PlanCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,
}

/// Evaluate path filters against the repository
#[derive(Debug, Args, Clone)]
pub struct ChangesCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// detect_changes job to evaluate (defaults to the only one)
    #[arg(long)]
    pub job: Option<String>,

    /// Diff base; defaults to the job's configured base, then the push's before commit
    #[arg(long)]
    pub base: Option<String>,

    /// Diff head; defaults to the trigger commit
    #[arg(long)]
    pub head: Option<String>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub trigger: TriggerArgs,

    #[command(flatten)]
    pub tools: ToolArgs,
}

/// List pipelines with recorded runs
#[derive(Debug, Args, Clone)]
pub struct ListCommand {
    /// Show run counts
    #[arg(long)]
    pub with_counts: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show run history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Pipeline name to filter by
    #[arg(short, long)]
    pub pipeline: Option<String>,

    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Show full details
    #[arg(long)]
    pub verbose: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    /// Show a single run
    #[arg(long)]
    pub run_id: Option<String>,
}

/// Trigger fields; each falls back to the CI environment
#[derive(Debug, Args, Clone, Default)]
pub struct TriggerArgs {
    /// Repository owner [env: GITHUB_REPOSITORY_OWNER]
    #[arg(long)]
    pub owner: Option<String>,

    /// Repository as owner/name [env: GITHUB_REPOSITORY]
    #[arg(long)]
    pub repository: Option<String>,

    /// Event name [env: GITHUB_EVENT_NAME]
    #[arg(long)]
    pub event: Option<String>,

    /// Pushed branch [env: GITHUB_REF_NAME]
    #[arg(long)]
    pub branch: Option<String>,

    /// Branch tip before the push [env: GITHUB_EVENT_PATH payload]
    #[arg(long)]
    pub before: Option<String>,

    /// Branch tip after the push [env: GITHUB_SHA]
    #[arg(long)]
    pub after: Option<String>,
}

impl From<&TriggerArgs> for TriggerOverrides {
    fn from(args: &TriggerArgs) -> Self {
        TriggerOverrides {
            owner: args.owner.clone(),
            repository: args.repository.clone(),
            event: args.event.clone(),
            branch: args.branch.clone(),
            before: args.before.clone(),
            after: args.after.clone(),
        }
    }
}

/// Where the external tools run
#[derive(Debug, Args, Clone)]
pub struct ToolArgs {
    /// Repository checkout
    #[arg(long, default_value = ".")]
    pub repo_dir: PathBuf,

    /// Git remote the sync branch is pushed to
    #[arg(long, default_value = "origin")]
    pub remote: String,

    /// Repository for the gh CLI (owner/name); defaults to the trigger repository
    #[arg(long, env = "GH_REPO")]
    pub github_repo: Option<String>,

    /// Timeout for a single external command, in seconds
    #[arg(long, default_value_t = 600)]
    pub tool_timeout: u64,
}

impl ToolArgs {
    pub fn collaborators(&self, trigger_repository: Option<&str>) -> Collaborators {
        let github_repo = self
            .github_repo
            .clone()
            .or_else(|| trigger_repository.map(str::to_string));
        Collaborators::system(
            self.repo_dir.clone(),
            self.remote.clone(),
            github_repo,
            self.tool_timeout,
        )
    }
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("Invalid key=value pair: {}", s)),
    }
}
