use anyhow::{anyhow, bail, Context, Result};
use release_gate::cli::commands::{
    ChangesCommand, HistoryCommand, ListCommand, PlanCommand, RunCommand, ValidateCommand,
};
use release_gate::cli::output::*;
use release_gate::cli::{Cli, Command};
use release_gate::core::config::PipelineConfig;
use release_gate::core::secret::SecretStore;
use release_gate::core::{ExecutionStatus, JobKind, RunContext, TriggerContext, TriggerOverrides};
use release_gate::execution::{ExecutionEngine, ExecutionEvent, JobExecutor};
use release_gate::jobs::changes;
use release_gate::persistence::{
    create_summary, record_run, InMemoryPersistence, PersistenceBackend, RunSummary,
};
use std::sync::Arc;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // RUST_LOG wins over -v
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!(e))
        .context("Failed to set logging subscriber")?;

    let exit_code = match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd).await?,
        Command::Validate(cmd) => validate_pipeline(cmd)?,
        Command::Plan(cmd) => show_plan(cmd)?,
        Command::Changes(cmd) => detect_changes(cmd).await?,
        Command::List(cmd) => list_pipelines(cmd).await?,
        Command::History(cmd) => show_history(cmd).await?,
    };

    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}

fn load_config(file: &str) -> Result<PipelineConfig> {
    PipelineConfig::from_file(file).with_context(|| format!("Failed to load pipeline config {}", file))
}

/// History store: SQLite when built with it, otherwise process memory
async fn open_history() -> Result<Arc<dyn PersistenceBackend>> {
    #[cfg(feature = "sqlite")]
    {
        let store = release_gate::persistence::SqliteRunStore::with_default_path()
            .await
            .context("Failed to open run history")?;
        Ok(Arc::new(store))
    }
    #[cfg(not(feature = "sqlite"))]
    {
        Ok(Arc::new(InMemoryPersistence::new()))
    }
}

async fn run_pipeline(cmd: &RunCommand) -> Result<i32> {
    let config = load_config(&cmd.file)?;
    println!("{} Loaded pipeline: {}", INFO, style(&config.name).bold());

    let mut pipeline = config.to_pipeline()?;

    for (key, value) in &cmd.variable {
        pipeline.variables.insert(key.clone(), value.clone());
        println!(
            "{} Variable override: {} = {}",
            INFO,
            style(key).cyan(),
            style(value).dim()
        );
    }

    let trigger = TriggerContext::from_env(&TriggerOverrides::from(&cmd.trigger))
        .context("Failed to determine the trigger")?;

    let history = if cmd.no_history {
        None
    } else {
        match open_history().await {
            Ok(store) => Some(store),
            Err(e) => {
                warn!("{:#}; this run will not be recorded", e);
                None
            }
        }
    };
    let persistent = history.is_some();
    let store: Arc<dyn PersistenceBackend> =
        history.unwrap_or_else(|| Arc::new(InMemoryPersistence::new()));

    let collaborators = cmd.tools.collaborators(trigger.repository.as_deref());
    let secrets = SecretStore::from_env(&pipeline.secrets);
    let executor = JobExecutor::new(collaborators, secrets, cmd.tools.repo_dir.clone());
    let engine = ExecutionEngine::new(executor, cmd.strategy);

    let progress = create_progress_bar(pipeline.jobs.len());
    let bar = progress.clone();
    engine
        .add_event_handler(move |event| {
            bar.println(format_execution_event(&event));
            match &event {
                ExecutionEvent::JobSucceeded { .. }
                | ExecutionEvent::JobFailed { .. }
                | ExecutionEvent::JobSkipped { .. } => bar.inc(1),
                ExecutionEvent::JobStarted { job_id } => bar.set_message(job_id.clone()),
                _ => {}
            }
        })
        .await;

    println!();
    let result = engine.execute(&mut pipeline, &trigger).await;
    progress.finish_and_clear();
    let status = result.context("Run failed")?;

    let summary = create_summary(&pipeline, &trigger);
    let saved = record_run(store.as_ref(), &summary).await;
    if saved && persistent {
        println!(
            "\n{} Run saved to history (ID: {})",
            INFO,
            style(&summary.run_id.to_string()[..8]).dim()
        );
    }

    match status {
        ExecutionStatus::Completed => println!(
            "\n{} {} completed {}",
            CHECK,
            style(&pipeline.name).bold(),
            style("successfully").green()
        ),
        ExecutionStatus::NotTriggered => println!(
            "\n{} {} not triggered by {} on {}",
            INFO,
            style(&pipeline.name).bold(),
            trigger.event,
            trigger.branch
        ),
        ExecutionStatus::Aborted => println!(
            "\n{} {} {}",
            STOP,
            style(&pipeline.name).bold(),
            style("aborted by repository guard").magenta()
        ),
        _ => println!(
            "\n{} {} {}",
            CROSS,
            style(&pipeline.name).bold(),
            style("failed").red()
        ),
    }

    Ok(status.exit_code())
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<i32> {
    println!("{} Validating pipeline...", INFO);

    match PipelineConfig::from_file(&cmd.file) {
        Ok(config) => {
            println!("{} Pipeline configuration is valid!", CHECK);
            println!("  Name: {}", style(&config.name).bold());
            println!(
                "  Trigger: {} on {}",
                style(&config.trigger.event).cyan(),
                style(&config.trigger.branch).cyan()
            );
            println!("  Jobs: {}", style(config.jobs.len()).cyan());
            println!("  Secrets: {}", style(config.secrets.len()).cyan());

            if cmd.json {
                let json = serde_json::to_string_pretty(&config)?;
                println!("\n{}", json);
            }
            Ok(0)
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            Ok(1)
        }
    }
}

fn show_plan(cmd: &PlanCommand) -> Result<i32> {
    let pipeline = load_config(&cmd.file)?.to_pipeline()?;

    println!(
        "{} {}: runs on {} to {}",
        INFO,
        style(&pipeline.name).bold(),
        style(&pipeline.trigger.event).cyan(),
        style(&pipeline.trigger.branch).cyan()
    );
    for (index, job_id) in pipeline.execution_order().iter().enumerate() {
        let job = pipeline
            .job(job_id)
            .ok_or_else(|| anyhow!("job '{}' missing from pipeline", job_id))?;
        println!("{}", format_plan_entry(index + 1, job));
    }
    Ok(0)
}

async fn detect_changes(cmd: &ChangesCommand) -> Result<i32> {
    let pipeline = load_config(&cmd.file)?.to_pipeline()?;

    let detectors: Vec<_> = pipeline
        .execution_order()
        .iter()
        .filter_map(|id| pipeline.job(id))
        .filter_map(|job| match &job.kind {
            JobKind::DetectChanges(spec) => Some((job.id.as_str(), spec)),
            _ => None,
        })
        .collect();

    let (job_id, spec) = match &cmd.job {
        Some(wanted) => detectors
            .iter()
            .find(|(id, _)| *id == wanted.as_str())
            .copied()
            .ok_or_else(|| anyhow!("no detect_changes job named '{}'", wanted))?,
        None => match detectors.as_slice() {
            [single] => *single,
            [] => bail!("pipeline has no detect_changes job"),
            _ => bail!("pipeline has several detect_changes jobs; pass --job"),
        },
    };

    let mut spec = spec.clone();
    if cmd.base.is_some() {
        spec.base = cmd.base.clone();
    }
    if cmd.head.is_some() {
        spec.head = cmd.head.clone();
    }

    // Outside CI the trigger defaults to the local checkout
    let primary = pipeline.trigger.branch.clone();
    let trigger = TriggerContext::resolve(&TriggerOverrides::from(&cmd.trigger), |name| {
        std::env::var(name)
            .ok()
            .filter(|v| !v.is_empty())
            .or_else(|| match name {
                "GITHUB_REPOSITORY_OWNER" => Some("local".to_string()),
                "GITHUB_REF_NAME" => Some(primary.clone()),
                "GITHUB_SHA" => Some("HEAD".to_string()),
                _ => None,
            })
    })
    .context("Failed to determine the trigger")?;

    let collaborators = cmd.tools.collaborators(trigger.repository.as_deref());
    let changes = changes::detect(&spec, &RunContext::new(trigger), collaborators.vcs.as_ref())
        .await
        .with_context(|| format!("Change detection for {} failed", job_id))?;

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&changes)?);
    } else {
        println!("{}", format_change_set(&changes, &spec.filters));
    }
    Ok(0)
}

async fn list_pipelines(cmd: &ListCommand) -> Result<i32> {
    let store = open_history().await?;
    let pipelines = store.list_pipelines().await?;

    if pipelines.is_empty() {
        println!("{} No pipelines found in history", INFO);
        return Ok(0);
    }

    let mut json_data = Vec::new();
    if !cmd.json {
        println!("{} Pipelines in history:", INFO);
    }

    for pipeline_name in &pipelines {
        let runs = store.list_runs(pipeline_name).await?;
        let count = |status: ExecutionStatus| runs.iter().filter(|r| r.status == status).count();

        if cmd.json {
            json_data.push(serde_json::json!({
                "name": pipeline_name,
                "run_count": runs.len(),
                "completed": count(ExecutionStatus::Completed),
                "failed": count(ExecutionStatus::Failed),
                "aborted": count(ExecutionStatus::Aborted),
            }));
        } else if cmd.with_counts {
            println!(
                "  {} ({} runs: {} succeeded, {} failed, {} aborted)",
                style(pipeline_name).bold(),
                style(runs.len()).cyan(),
                style(count(ExecutionStatus::Completed)).green(),
                style(count(ExecutionStatus::Failed)).red(),
                style(count(ExecutionStatus::Aborted)).magenta()
            );
        } else {
            println!("  {}", style(pipeline_name).bold());
        }
    }

    if cmd.json {
        let data = serde_json::json!({ "pipelines": json_data });
        println!("{}", serde_json::to_string_pretty(&data)?);
    }

    Ok(0)
}

async fn show_history(cmd: &HistoryCommand) -> Result<i32> {
    let store = open_history().await?;

    if let Some(run_id) = &cmd.run_id {
        let run_id = uuid::Uuid::parse_str(run_id).context("Invalid run ID format")?;
        match store.load_run(run_id).await? {
            Some(summary) => print_run_details(&summary, cmd.verbose)?,
            None => println!("{} Run not found", WARN),
        }
        return Ok(0);
    }

    let mut runs = match &cmd.pipeline {
        Some(pipeline_name) => store.list_runs(pipeline_name).await?,
        None => {
            let mut all_runs = Vec::new();
            for pipeline in store.list_pipelines().await? {
                all_runs.extend(store.list_runs(&pipeline).await?);
            }
            all_runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
            all_runs
        }
    };
    runs.truncate(cmd.limit);

    if runs.is_empty() {
        println!("{} No runs found", INFO);
        return Ok(0);
    }

    if cmd.json {
        let data = serde_json::json!({ "runs": runs });
        println!("{}", serde_json::to_string_pretty(&data)?);
    } else {
        println!("{} Run history (showing latest {}):", INFO, runs.len());
        for summary in &runs {
            println!("  {}", format_run_summary(summary));
        }
    }

    Ok(0)
}

fn print_run_details(summary: &RunSummary, verbose: bool) -> Result<()> {
    println!("{} Run Details", INFO);
    println!("  ID: {}", style(summary.run_id).cyan());
    println!("  Pipeline: {}", style(&summary.pipeline_name).bold());
    println!("  Status: {}", format_status(summary.status));
    println!(
        "  Trigger: {} pushed {} to {}",
        style(&summary.owner).bold(),
        style(&summary.sha).dim(),
        style(&summary.branch).cyan()
    );
    println!("  Started: {}", style(summary.started_at.to_rfc3339()).dim());
    if let Some(completed) = summary.completed_at {
        println!("  Completed: {}", style(completed.to_rfc3339()).dim());
        if let Ok(duration) = completed.signed_duration_since(summary.started_at).to_std() {
            println!("  Duration: {}", style(format_duration(duration)).dim());
        }
    }
    println!(
        "  Jobs: {} succeeded, {} failed, {} skipped of {} ({})",
        style(summary.succeeded_jobs).green(),
        style(summary.failed_jobs).red(),
        style(summary.skipped_jobs).dim(),
        summary.total_jobs,
        style(format!("{:.0}%", summary.progress * 100.0)).cyan()
    );

    if verbose {
        println!("\n  {}", style("Full details:").bold());
        let json = serde_json::to_string_pretty(summary)?;
        for line in json.lines() {
            println!("    {}", line);
        }
    }

    Ok(())
}
