//! Typed job gates

use crate::core::context::JobOutput;
use std::collections::HashMap;
use std::fmt;

/// Boolean precondition controlling whether a job runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Gate {
    /// Runs whenever its upstream jobs succeed
    Always,
    /// Runs only when the named flag of a change detection job is true
    Changed { job: String, flag: String },
}

/// Result of evaluating a gate against upstream outputs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Open,
    Closed,
    /// The flag was never computed; distinct from `Closed`
    Undetermined(String),
}

impl Gate {
    /// Parse a `<job>.<flag>` reference
    pub fn changed(expr: &str) -> Result<Self, String> {
        match expr.split_once('.') {
            Some((job, flag)) if !job.is_empty() && !flag.is_empty() && !flag.contains('.') => {
                Ok(Gate::Changed {
                    job: job.to_string(),
                    flag: flag.to_string(),
                })
            }
            _ => Err(format!(
                "invalid gate '{}': expected <job>.<flag>",
                expr
            )),
        }
    }

    pub fn evaluate(&self, outputs: &HashMap<String, JobOutput>) -> GateDecision {
        match self {
            Gate::Always => GateDecision::Open,
            Gate::Changed { job, flag } => match outputs.get(job) {
                Some(JobOutput::Changes(changes)) => match changes.flag(flag) {
                    Some(true) => GateDecision::Open,
                    Some(false) => GateDecision::Closed,
                    None => GateDecision::Undetermined(format!(
                        "job '{}' has no flag '{}'",
                        job, flag
                    )),
                },
                Some(_) => GateDecision::Undetermined(format!(
                    "job '{}' does not detect changes",
                    job
                )),
                None => GateDecision::Undetermined(format!(
                    "job '{}' has not produced an output",
                    job
                )),
            },
        }
    }
}

impl fmt::Display for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gate::Always => f.write_str("always"),
            Gate::Changed { job, flag } => write!(f, "{}.{}", job, flag),
        }
    }
}
