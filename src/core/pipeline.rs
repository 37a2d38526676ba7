//! Pipeline domain model

use crate::core::{
    config::{PipelineConfig, TriggerConfig},
    context::{RunContext, TriggerContext},
    job::{Job, JobDefaults},
    state::{ExecutionStatus, JobState, RunState, SkipReason},
};
use anyhow::Result;
use std::collections::{BTreeMap, HashMap, HashSet};

/// A pipeline definition plus the state of one run
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// Pipeline name
    pub name: String,

    /// Accepted trigger
    pub trigger: TriggerConfig,

    /// Global variables available to command templates
    pub variables: HashMap<String, String>,

    /// Secret slot -> environment variable
    pub secrets: BTreeMap<String, String>,

    /// Pipeline jobs
    pub jobs: HashMap<String, Job>,

    /// Run state
    pub state: RunState,

    /// Job order (topological sort)
    execution_order: Vec<String>,
}

impl Pipeline {
    /// Create a pipeline from a validated configuration
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let defaults = JobDefaults {
            timeout_secs: config
                .default_timeout_secs
                .unwrap_or(JobDefaults::default().timeout_secs),
        };

        let mut jobs = HashMap::new();
        for job_config in &config.jobs {
            let job = Job::from_config(job_config, config, &defaults)?;
            jobs.insert(job.id.clone(), job);
        }

        let execution_order = Self::topological_sort(&jobs);

        Ok(Pipeline {
            name: config.name.clone(),
            trigger: config.trigger.clone(),
            variables: config.variables.clone(),
            secrets: config.secrets.clone(),
            jobs,
            state: RunState::new(),
            execution_order,
        })
    }

    /// Get a job by ID
    pub fn job(&self, id: &str) -> Option<&Job> {
        self.jobs.get(id)
    }

    /// Get a mutable job by ID
    pub fn job_mut(&mut self, id: &str) -> Option<&mut Job> {
        self.jobs.get_mut(id)
    }

    /// Why this trigger does not start a run, if it doesn't
    pub fn rejects_trigger(&self, trigger: &TriggerContext) -> Option<String> {
        if trigger.event != self.trigger.event {
            return Some(format!(
                "event '{}' is not '{}'",
                trigger.event, self.trigger.event
            ));
        }
        if trigger.branch != self.trigger.branch {
            return Some(format!(
                "branch '{}' is not '{}'",
                trigger.branch, self.trigger.branch
            ));
        }
        None
    }

    fn succeeded_ids(&self) -> HashSet<String> {
        self.jobs
            .values()
            .filter(|j| j.state.is_success())
            .map(|j| j.id.clone())
            .collect()
    }

    /// Pending jobs whose `needs` have all succeeded, in execution order
    pub fn ready_jobs(&self) -> Vec<&Job> {
        let succeeded = self.succeeded_ids();

        self.execution_order
            .iter()
            .filter_map(|id| self.jobs.get(id))
            .filter(|j| matches!(j.state, JobState::Pending) && j.dependencies_met(&succeeded))
            .collect()
    }

    /// Pending jobs that can never start because an upstream job failed or was skipped
    pub fn blocked_jobs(&self) -> Vec<(String, SkipReason)> {
        let mut blocked = Vec::new();
        for id in &self.execution_order {
            let Some(job) = self.jobs.get(id) else { continue };
            if !matches!(job.state, JobState::Pending) {
                continue;
            }
            let reason = job.needs.iter().find_map(|dep| match self.jobs.get(dep).map(|d| &d.state) {
                Some(JobState::Failed { .. }) => Some(SkipReason::UpstreamFailed { job: dep.clone() }),
                Some(JobState::Skipped { .. }) => Some(SkipReason::UpstreamSkipped { job: dep.clone() }),
                _ => None,
            });
            if let Some(reason) = reason {
                blocked.push((id.clone(), reason));
            }
        }
        blocked
    }

    /// Get all currently running jobs
    pub fn running_jobs(&self) -> Vec<&Job> {
        self.jobs
            .values()
            .filter(|j| matches!(j.state, JobState::Running { .. }))
            .collect()
    }

    /// Check if every job reached a terminal state
    pub fn is_complete(&self) -> bool {
        self.jobs.values().all(|j| j.state.is_terminal())
    }

    pub fn has_failed(&self) -> bool {
        self.jobs
            .values()
            .any(|j| matches!(j.state, JobState::Failed { .. }))
    }

    pub fn is_aborted(&self) -> bool {
        self.state.status == ExecutionStatus::Aborted
    }

    /// Get execution order (topological sort)
    pub fn execution_order(&self) -> &[String] {
        &self.execution_order
    }

    /// Calculate topological sort of jobs based on `needs`
    fn topological_sort(jobs: &HashMap<String, Job>) -> Vec<String> {
        let mut result = Vec::new();
        let mut visited = HashSet::new();

        // Sort for deterministic order
        let mut job_ids: Vec<_> = jobs.keys().cloned().collect();
        job_ids.sort();

        for job_id in job_ids {
            Self::visit(&job_id, jobs, &mut visited, &mut result);
        }

        result
    }

    fn visit(
        job_id: &str,
        jobs: &HashMap<String, Job>,
        visited: &mut HashSet<String>,
        result: &mut Vec<String>,
    ) {
        if !visited.insert(job_id.to_string()) {
            return;
        }

        if let Some(job) = jobs.get(job_id) {
            let mut needs = job.needs.clone();
            needs.sort();
            for dep in &needs {
                Self::visit(dep, jobs, visited, result);
            }
        }

        result.push(job_id.to_string());
    }

    /// Create the execution context for a job
    ///
    /// Only outputs of the jobs listed in `needs` are visible.
    pub fn create_context_for_job(&self, job_id: &str, trigger: &TriggerContext) -> RunContext {
        let mut context = RunContext::new(trigger.clone());
        context.variables.extend(self.variables.clone());

        if let Some(job) = self.jobs.get(job_id) {
            for dep in &job.needs {
                if let Some(output) = self.jobs.get(dep).and_then(|d| d.state.output()) {
                    context.set_output(dep, output.clone());
                }
            }
        }

        context.current_job_id = Some(job_id.to_string());
        context
    }
}
