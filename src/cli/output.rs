//! CLI output formatting

use crate::{
    core::{condition::Gate, filter::{ChangeSet, FilterSet}, short_sha, ExecutionStatus, Job, JobState},
    execution::ExecutionEvent,
    persistence::RunSummary,
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "- ");
pub static STOP: Emoji<'_, '_> = Emoji("🛑 ", "# ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");

/// Create a progress bar counting finished jobs
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    progress.set_style(style);
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Format a job state for display
pub fn format_job_state(state: &JobState) -> String {
    match state {
        JobState::Pending => style("PENDING").dim().to_string(),
        JobState::Running { .. } => style("RUNNING").yellow().to_string(),
        JobState::Succeeded { .. } => style("SUCCEEDED").green().to_string(),
        JobState::Failed { .. } => style("FAILED").red().to_string(),
        JobState::Skipped { .. } => style("SKIPPED").dim().to_string(),
    }
}

/// Format a run status for display
pub fn format_status(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Pending => style("PENDING").dim().to_string(),
        ExecutionStatus::Running => style("RUNNING").yellow().to_string(),
        ExecutionStatus::Completed => style("COMPLETED").green().to_string(),
        ExecutionStatus::Failed => style("FAILED").red().to_string(),
        ExecutionStatus::Aborted => style("ABORTED").magenta().to_string(),
        ExecutionStatus::NotTriggered => style("NOT TRIGGERED").dim().to_string(),
    }
}

/// Format a run summary as one history line
pub fn format_run_summary(summary: &RunSummary) -> String {
    let status_icon = match summary.status {
        ExecutionStatus::Completed => CHECK,
        ExecutionStatus::Failed => CROSS,
        ExecutionStatus::Aborted => STOP,
        ExecutionStatus::Running => SPINNER,
        _ => INFO,
    };

    format!(
        "{} {} - {} - {} @ {} - {} ({} ok, {} failed, {} skipped of {})",
        status_icon,
        style(&summary.run_id.to_string()[..8]).dim(),
        style(&summary.pipeline_name).bold(),
        style(&summary.branch).cyan(),
        style(short_sha(&summary.sha)).dim(),
        format_status(summary.status),
        style(summary.succeeded_jobs).green(),
        style(summary.failed_jobs).red(),
        style(summary.skipped_jobs).dim(),
        summary.total_jobs,
    )
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::RunStarted {
            run_id,
            pipeline_name,
            total_jobs,
        } => format!(
            "{} Starting {} with {} jobs ({})",
            ROCKET,
            style(pipeline_name).bold(),
            total_jobs,
            style(&run_id.to_string()[..8]).dim()
        ),
        ExecutionEvent::RunNotTriggered { reason, .. } => {
            format!("{} Not triggered: {}", INFO, style(reason).dim())
        }
        ExecutionEvent::JobStarted { job_id } => format!("{} {}", SPINNER, style(job_id).cyan()),
        ExecutionEvent::JobSucceeded { job_id, output } => format!(
            "{} {}: {}",
            CHECK,
            style(job_id).green(),
            style(output.summary()).dim()
        ),
        ExecutionEvent::JobSkipped { job_id, reason } => {
            format!("{} {} ({})", SKIP, style(job_id).dim(), reason)
        }
        ExecutionEvent::JobFailed { job_id, error } => {
            format!("{} {}: {}", CROSS, style(job_id).red(), style(error).dim())
        }
        ExecutionEvent::RunCompleted { run_id, status } => {
            let status_str = match status {
                ExecutionStatus::Completed => {
                    format!("{} completed", style("successfully").green())
                }
                ExecutionStatus::Failed => style("failed").red().to_string(),
                ExecutionStatus::Aborted => style("aborted by guard").magenta().to_string(),
                other => other.to_string(),
            };
            format!(
                "{} Run ({}) {}",
                INFO,
                style(&run_id.to_string()[..8]).dim(),
                status_str
            )
        }
    }
}

/// One line of the execution plan
pub fn format_plan_entry(position: usize, job: &Job) -> String {
    let needs = if job.needs.is_empty() {
        String::new()
    } else {
        format!(" needs [{}]", job.needs.join(", "))
    };
    let gate = match &job.gate {
        Gate::Always => String::new(),
        gate => format!(" when {}", style(gate).yellow()),
    };
    format!(
        "  {:>2}. {} {}{}{}",
        position,
        style(&job.id).bold(),
        style(format!("({})", job.kind.kind_name())).dim(),
        needs,
        gate
    )
}

/// Flags of a change detection, each with the patterns that decide it
pub fn format_change_set(changes: &ChangeSet, filters: &FilterSet) -> String {
    let base = match changes.base.sha() {
        Some(sha) => short_sha(sha).to_string(),
        None => "empty tree".to_string(),
    };
    let mut lines = vec![format!(
        "{} {}..{}: {} paths changed",
        INFO,
        style(base).dim(),
        style(short_sha(&changes.head)).dim(),
        changes.paths.len()
    )];
    for filter in filters.iter() {
        let value = match changes.flag(filter.name()) {
            Some(true) => style("true").green(),
            Some(false) => style("false").dim(),
            None => style("unset").yellow(),
        };
        lines.push(format!(
            "  {} = {}  {}",
            style(filter.name()).cyan(),
            value,
            style(filter.patterns().join(" ")).dim()
        ));
    }
    lines.join("\n")
}

/// Format a duration the way history prints it
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
