//! Branch syncer

use crate::core::{short_sha, SyncOutcome, SyncSpec, TriggerContext};
use crate::jobs::JobError;
use crate::tools::{PullRequestRequest, ReleaseHost, Vcs};
use tracing::{info, warn};

/// Mirror the source branch onto the sync branch and open a pull request
///
/// The sync branch is overwritten, not merged into.
pub async fn sync(
    spec: &SyncSpec,
    trigger: &TriggerContext,
    vcs: &dyn Vcs,
    host: &dyn ReleaseHost,
) -> Result<SyncOutcome, JobError> {
    let sha = match vcs.resolve(&spec.source).await? {
        Some(sha) => sha,
        None if spec.source == trigger.branch => {
            warn!(
                "Branch {} not found locally, using trigger commit",
                spec.source
            );
            trigger.after.clone()
        }
        None => {
            return Err(JobError::UnknownRevision {
                rev: spec.source.clone(),
            })
        }
    };

    vcs.force_update_branch(&spec.branch, &sha).await?;
    info!("Reset {} to {} ({})", spec.branch, short_sha(&sha), spec.source);

    let pull_request = host
        .open_pull_request(&PullRequestRequest {
            head: spec.branch.clone(),
            base: spec.base.clone(),
            title: spec.title.clone(),
            body: spec.body.clone(),
            reviewers: spec.reviewers.clone(),
            assignees: spec.assignees.clone(),
        })
        .await?;

    Ok(SyncOutcome {
        branch: spec.branch.clone(),
        sha,
        pull_request,
    })
}
