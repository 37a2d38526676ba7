//! Execution scheduler - determines which jobs to start next

use crate::core::Pipeline;
use std::fmt;
use std::str::FromStr;

/// Strategy for scheduling job execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulingStrategy {
    /// Execute jobs in dependency order, one at a time
    Sequential,

    /// Start every ready job at once
    #[default]
    Parallel,

    /// Limited parallelism (max N concurrent jobs)
    LimitedParallel(usize),
}

impl FromStr for SchedulingStrategy {
    type Err = String;

    /// Parses `sequential`, `parallel` or `parallel:<n>`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sequential" => Ok(SchedulingStrategy::Sequential),
            "parallel" => Ok(SchedulingStrategy::Parallel),
            other => match other.strip_prefix("parallel:").map(str::parse::<usize>) {
                Some(Ok(max)) if max > 0 => Ok(SchedulingStrategy::LimitedParallel(max)),
                _ => Err(format!(
                    "invalid strategy '{}': expected sequential, parallel or parallel:<n>",
                    other
                )),
            },
        }
    }
}

impl fmt::Display for SchedulingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulingStrategy::Sequential => f.write_str("sequential"),
            SchedulingStrategy::Parallel => f.write_str("parallel"),
            SchedulingStrategy::LimitedParallel(max) => write!(f, "parallel:{}", max),
        }
    }
}

/// Scheduler for determining which jobs to run
#[derive(Debug, Clone)]
pub struct ExecutionScheduler {
    strategy: SchedulingStrategy,
}

impl ExecutionScheduler {
    pub fn new(strategy: SchedulingStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> SchedulingStrategy {
        self.strategy
    }

    /// Get the next batch of jobs to start
    pub fn next_jobs(&self, pipeline: &Pipeline) -> Vec<String> {
        let max = match self.strategy {
            SchedulingStrategy::Sequential => 1,
            SchedulingStrategy::Parallel => usize::MAX,
            SchedulingStrategy::LimitedParallel(max) => max,
        };

        let remaining = max.saturating_sub(pipeline.running_jobs().len());
        if remaining == 0 {
            return vec![];
        }

        pipeline
            .ready_jobs()
            .into_iter()
            .take(remaining)
            .map(|j| j.id.clone())
            .collect()
    }
}
