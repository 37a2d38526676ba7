//! Conditional publisher

use crate::core::secret::{Secret, SecretStore};
use crate::core::{
    render_template, CommandTemplate, EnvValue, PublishOutcome, PublishSpec, PublishStatus,
    RunContext,
};
use crate::jobs::{run_checked, JobError};
use crate::tools::{Collaborators, Invocation, ToolError, UploadOutcome};
use globset::GlobMatcher;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

/// Directories never searched for artifacts
const SKIPPED_DIRS: &[&str] = &[".git", "node_modules"];

/// Build the package, attach its artifacts to the release and publish it
pub async fn publish(
    spec: &PublishSpec,
    context: &RunContext,
    collaborators: &Collaborators,
    secrets: &SecretStore,
    root: &Path,
) -> Result<PublishOutcome, JobError> {
    let release = context
        .release(&spec.release_job)
        .ok_or_else(|| JobError::MissingOutput {
            job: spec.release_job.clone(),
        })?
        .clone();

    let mut vars = context.get_rendering_variables();
    vars.insert("version".to_string(), release.version.clone());
    vars.insert("tag_name".to_string(), release.tag_name.clone());
    vars.insert("upload_url".to_string(), release.upload_url.clone());

    let workdir = match &spec.workdir {
        Some(dir) => root.join(dir),
        None => root.to_path_buf(),
    };
    let command = CommandBuilder::new(spec, &vars, secrets, &workdir)?;
    let runner = collaborators.runner.as_ref();

    for step in spec.setup.iter().chain(spec.build.iter()) {
        let invocation = command.build(step)?;
        info!("[{}] {}", spec.channel, invocation);
        run_checked(runner, &invocation, secrets).await?;
    }

    let mut uploaded = Vec::new();
    let mut existing = Vec::new();
    if !spec.artifacts.is_empty() {
        let artifacts = find_artifacts(&workdir, &spec.artifacts)?;
        if artifacts.is_empty() {
            return Err(JobError::NoArtifacts {
                patterns: spec.artifacts.iter().map(|g| g.glob().to_string()).collect(),
                dir: workdir,
            });
        }

        for artifact in &artifacts {
            let name = artifact
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            match collaborators.host.upload_asset(&release, artifact).await? {
                UploadOutcome::Uploaded => {
                    info!("Uploaded {} to {}", name, release.tag_name);
                    uploaded.push(name);
                }
                UploadOutcome::AlreadyExists if spec.skip_existing => {
                    warn!("{} already attached to {}, skipping", name, release.tag_name);
                    existing.push(name);
                }
                UploadOutcome::AlreadyExists => {
                    return Err(JobError::AssetExists {
                        name,
                        tag: release.tag_name.clone(),
                    })
                }
            }
        }
    }

    let status = match &spec.publish {
        None => PublishStatus::UploadOnly,
        Some(step) => {
            let invocation = command.build(step)?;
            info!("[{}] {}", spec.channel, invocation);
            let output = runner.run(&invocation).await?;

            if output.is_success() {
                PublishStatus::Published
            } else if spec.skip_existing && is_conflict(&output.combined(), spec) {
                warn!(
                    "{} {} is already published, skipping",
                    spec.channel, release.version
                );
                PublishStatus::AlreadyPublished
            } else {
                return Err(JobError::Tool(ToolError::Failed {
                    program: invocation.program.clone(),
                    code: output.code.unwrap_or(-1),
                    stderr: secrets.redact(output.stderr.trim()),
                }));
            }
        }
    };

    Ok(PublishOutcome {
        channel: spec.channel.clone(),
        version: release.version,
        status,
        uploaded,
        existing,
    })
}

fn is_conflict(output: &str, spec: &PublishSpec) -> bool {
    spec.conflict_patterns.iter().any(|p| p.is_match(output))
}

/// Renders command templates into invocations sharing one environment
struct CommandBuilder<'a> {
    vars: &'a HashMap<String, String>,
    workdir: &'a Path,
    env: Vec<(String, String)>,
    secret_env: Vec<(String, Secret)>,
}

impl<'a> CommandBuilder<'a> {
    fn new(
        spec: &PublishSpec,
        vars: &'a HashMap<String, String>,
        secrets: &SecretStore,
        workdir: &'a Path,
    ) -> Result<Self, JobError> {
        let mut env = Vec::new();
        let mut secret_env = Vec::new();
        for (name, value) in &spec.env {
            match value {
                EnvValue::Plain(value) => env.push((name.clone(), render_template(value, vars))),
                EnvValue::Secret(slot) => {
                    let secret = secrets
                        .get(slot)
                        .ok_or_else(|| JobError::MissingSecret { slot: slot.clone() })?;
                    secret_env.push((name.clone(), secret.clone()));
                }
            }
        }
        Ok(Self {
            vars,
            workdir,
            env,
            secret_env,
        })
    }

    fn build(&self, template: &CommandTemplate) -> Result<Invocation, JobError> {
        let mut invocation = Invocation::from_argv(&template.render(self.vars))
            .ok_or(JobError::EmptyCommand)?
            .current_dir(self.workdir);
        for (key, value) in &self.env {
            invocation = invocation.env(key.clone(), value.clone());
        }
        for (key, secret) in &self.secret_env {
            invocation = invocation.secret_env(key.clone(), secret.clone());
        }
        Ok(invocation)
    }
}

/// Files under `dir` whose relative path matches any of `globs`, sorted
pub fn find_artifacts(dir: &Path, globs: &[GlobMatcher]) -> Result<Vec<PathBuf>, JobError> {
    let mut found = Vec::new();
    for entry in WalkDir::new(dir).into_iter().filter_entry(|e| !is_skipped_dir(e)) {
        let entry = entry.map_err(|err| walk_error(dir, err))?;
        if entry.file_type().is_dir() {
            continue;
        }

        let Ok(relative) = entry.path().strip_prefix(dir) else {
            continue;
        };
        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if globs.iter().any(|g| g.is_match(&relative)) {
            found.push(entry.into_path());
        }
    }
    found.sort();
    debug!("{} artifact(s) under {}", found.len(), dir.display());
    Ok(found)
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| SKIPPED_DIRS.contains(&name))
}

fn walk_error(dir: &Path, err: walkdir::Error) -> JobError {
    let path = err.path().unwrap_or(dir).to_path_buf();
    JobError::Io {
        path,
        source: err.into(),
    }
}
