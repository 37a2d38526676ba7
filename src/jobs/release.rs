//! Release coordinator

use crate::core::secret::SecretStore;
use crate::core::{render_template, ReleaseDescriptor, ReleaseSpec, RunContext};
use crate::jobs::{run_checked, JobError};
use crate::tools::{Invocation, ReleaseHost, ReleaseRequest, ToolRunner};
use regex::Regex;
use std::path::Path;
use tracing::info;

/// Pull the current version out of the version tool's output
///
/// Uses the first capture group of `pattern`. When the pattern does not
/// match, output consisting of a single non-empty line is taken verbatim.
pub fn extract_version(stdout: &str, pattern: &Regex) -> Option<String> {
    if let Some(version) = pattern
        .captures(stdout)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|v| !v.is_empty())
    {
        return Some(version);
    }

    let mut lines = stdout.lines().map(str::trim).filter(|l| !l.is_empty());
    match (lines.next(), lines.next()) {
        (Some(only), None) => Some(only.to_string()),
        _ => None,
    }
}

/// Determine the version and publish a release for it
pub async fn create(
    spec: &ReleaseSpec,
    context: &RunContext,
    runner: &dyn ToolRunner,
    host: &dyn ReleaseHost,
    root: &Path,
) -> Result<ReleaseDescriptor, JobError> {
    let mut vars = context.get_rendering_variables();

    let argv = spec.version_command.render(&vars);
    let mut invocation = Invocation::from_argv(&argv).ok_or(JobError::EmptyCommand)?;
    invocation = invocation.current_dir(match &spec.workdir {
        Some(dir) => root.join(dir),
        None => root.to_path_buf(),
    });

    let output = run_checked(runner, &invocation, &SecretStore::new()).await?;
    let version = extract_version(&output.stdout, &spec.version_pattern).ok_or_else(|| {
        JobError::Version {
            command: invocation.to_string(),
        }
    })?;
    info!("Current version is {}", version);

    vars.insert("version".to_string(), version.clone());
    let tag_name = render_template(&spec.tag_template, &vars);
    let title = match &spec.title_template {
        Some(title) => render_template(title, &vars),
        None => tag_name.clone(),
    };

    let published = host
        .publish_release(&ReleaseRequest {
            tag_name: tag_name.clone(),
            title,
            target: context.trigger.after.clone(),
            generate_notes: spec.generate_notes,
            draft: spec.draft,
        })
        .await?;

    Ok(ReleaseDescriptor {
        version,
        tag_name: published.tag_name,
        upload_url: published.upload_url,
    })
}
