//! Change detector

use crate::core::filter::{ChangeSet, DiffBase};
use crate::core::{short_sha, ChangesSpec, RunContext};
use crate::jobs::JobError;
use crate::tools::Vcs;
use tracing::{debug, info};

/// Pick the commit to diff against
///
/// The configured base (or the push's `before`) is used when it resolves to
/// a commit distinct from head. Otherwise the head's first parent is used,
/// and a root commit diffs against the empty tree.
pub async fn resolve_base(
    vcs: &dyn Vcs,
    requested: Option<&str>,
    head: &str,
) -> Result<DiffBase, JobError> {
    if let Some(rev) = requested {
        match vcs.resolve(rev).await? {
            Some(sha) if sha != head => return Ok(DiffBase::Requested { sha }),
            Some(_) => debug!("Base {} equals head, using parent", rev),
            None => debug!("Base {} does not resolve, using parent", rev),
        }
    }

    match vcs.first_parent(head).await? {
        Some(sha) => Ok(DiffBase::Parent { sha }),
        None => Ok(DiffBase::EmptyTree),
    }
}

/// Compute the changed paths and evaluate every filter
pub async fn detect(
    spec: &ChangesSpec,
    context: &RunContext,
    vcs: &dyn Vcs,
) -> Result<ChangeSet, JobError> {
    let trigger = &context.trigger;
    let head_rev = spec.head.as_deref().unwrap_or(&trigger.after);
    let head = vcs
        .resolve(head_rev)
        .await?
        .ok_or_else(|| JobError::UnknownRevision {
            rev: head_rev.to_string(),
        })?;

    let requested = spec.base.as_deref().or_else(|| trigger.before_commit());
    let base = resolve_base(vcs, requested, &head).await?;

    let paths = match base.sha() {
        Some(sha) => vcs.changed_paths(sha, &head).await?,
        None => vcs.tree_paths(&head).await?,
    };

    let flags = spec.filters.evaluate(&paths);
    info!(
        "{} paths changed between {} and {}",
        paths.len(),
        base.sha().map(short_sha).unwrap_or("empty tree"),
        short_sha(&head)
    );
    for (name, value) in &flags {
        debug!("Filter {} = {}", name, value);
    }

    Ok(ChangeSet {
        base,
        head,
        paths,
        flags,
    })
}
