//! Repository guard

use crate::core::{config::GuardMode, GuardSpec, JobOutput, TriggerContext};
use crate::jobs::JobError;
use tracing::{info, warn};

/// Compare the trigger owner with the configured one
///
/// Owner logins are case-insensitive on the hosting platform, so the
/// comparison is too. Has no side effects.
pub fn check(spec: &GuardSpec, trigger: &TriggerContext) -> Result<JobOutput, JobError> {
    let matches = trigger.owner.eq_ignore_ascii_case(&spec.owner);
    let allowed = match spec.mode {
        GuardMode::Require => matches,
        GuardMode::Reject => !matches,
    };

    if !allowed {
        warn!(
            "Guard rejected owner '{}' ({} '{}')",
            trigger.owner, spec.mode, spec.owner
        );
        return Err(JobError::GuardRejected {
            owner: trigger.owner.clone(),
            expected: spec.owner.clone(),
            mode: spec.mode,
        });
    }

    info!("Guard accepted owner '{}'", trigger.owner);
    Ok(JobOutput::GuardPassed {
        owner: trigger.owner.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(mode: GuardMode) -> GuardSpec {
        GuardSpec {
            owner: "cmu-delphi".to_string(),
            mode,
        }
    }

    fn trigger(owner: &str) -> TriggerContext {
        TriggerContext::push(owner, "main", None, "abc")
    }

    #[test]
    fn test_require_accepts_matching_owner() {
        let output = check(&spec(GuardMode::Require), &trigger("cmu-delphi")).unwrap();
        assert_eq!(
            output,
            JobOutput::GuardPassed {
                owner: "cmu-delphi".to_string()
            }
        );
    }

    #[test]
    fn test_owner_comparison_ignores_case() {
        assert!(check(&spec(GuardMode::Require), &trigger("CMU-Delphi")).is_ok());
    }

    #[test]
    fn test_require_rejects_fork() {
        let err = check(&spec(GuardMode::Require), &trigger("someone-else")).unwrap_err();
        assert!(err.is_guard_rejection());
    }

    #[test]
    fn test_reject_mode_inverts() {
        assert!(check(&spec(GuardMode::Reject), &trigger("cmu-delphi"))
            .unwrap_err()
            .is_guard_rejection());
        assert!(check(&spec(GuardMode::Reject), &trigger("someone-else")).is_ok());
    }
}
