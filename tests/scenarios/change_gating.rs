//! Test: change flags gate the python publisher, the JS publisher is ungated

use crate::helpers::*;
use release_gate::core::{ExecutionStatus, PublishStatus, SkipReason};

#[tokio::test]
async fn test_unrelated_push_skips_python_publisher() {
    let harness = Harness::new(FakeVcs::new().commit("c1", &["docs/api/covidcast.md"]));

    let result = harness.run(RELEASE_HELPER, &push("c0", "c1")).await;

    assert_eq!(result.status, ExecutionStatus::Completed, "{}", result.summary());
    assert_eq!(
        result.skip_reason("release_python_client"),
        Some(&SkipReason::GateClosed {
            gate: "client_changed.python".to_string()
        })
    );
    assert!(harness.runner.calls_to("twine").is_empty());
    assert!(harness.runner.calls_to("python").is_empty());

    // JS still ships with the release
    assert_eq!(
        result.published("release_js_client").status,
        PublishStatus::Published
    );
    assert_eq!(harness.host.assets("v4.1.0"), vec![NPM_ARTIFACT]);
}

#[tokio::test]
async fn test_client_push_runs_both_publishers() {
    let harness = Harness::new(FakeVcs::new().commit("c1", &["src/client/delphi_epidata.py"]));

    let result = harness.run(RELEASE_HELPER, &push("c0", "c1")).await;

    assert_eq!(result.status, ExecutionStatus::Completed, "{}", result.summary());
    assert_eq!(result.pipeline.state.succeeded_jobs, 6);

    let python = result.published("release_python_client");
    assert_eq!(python.status, PublishStatus::Published);
    assert_eq!(python.version, VERSION);
    assert_eq!(python.uploaded, PYPI_ARTIFACTS);
    assert_eq!(
        result.published("release_js_client").status,
        PublishStatus::Published
    );

    // The release points at the pushed commit
    let releases = harness.host.releases();
    assert_eq!(releases.len(), 1);
    assert_eq!(releases[0].tag_name, "v4.1.0");
    assert_eq!(releases[0].target, "c1");
    assert!(releases[0].generate_notes);

    let mut expected: Vec<&str> = PYPI_ARTIFACTS.to_vec();
    expected.push(NPM_ARTIFACT);
    expected.sort();
    assert_eq!(harness.host.assets("v4.1.0"), expected);

    let twine = harness.runner.calls_to("twine upload");
    assert_eq!(twine.len(), 1);
    assert!(twine[0]
        .cwd
        .as_ref()
        .unwrap()
        .ends_with("src/client/packaging/pypi"));
    assert!(twine[0]
        .env
        .contains(&("TWINE_USERNAME".to_string(), "__token__".to_string())));
    assert_eq!(twine[0].secret_env, vec!["TWINE_PASSWORD"]);

    // Build runs before publish
    let lines: Vec<String> = harness.runner.calls().into_iter().map(|c| c.line).collect();
    let build = lines.iter().position(|l| l == "python -m build").unwrap();
    let upload = lines.iter().position(|l| l == "twine upload dist/*").unwrap();
    assert!(build < upload);
}

#[tokio::test]
async fn test_packaging_change_sets_python_flag() {
    let harness = Harness::new(
        FakeVcs::new()
            .commit("c1", &["src/client/packaging/pypi/pyproject.toml"])
            .commit("c2", &["README.md"]),
    );

    let result = harness.run(RELEASE_HELPER, &push("c0", "c2")).await;

    assert_eq!(result.status, ExecutionStatus::Completed, "{}", result.summary());
    assert!(result.succeeded("release_python_client"));
}

#[tokio::test]
async fn test_only_the_last_commit_counts_when_branch_is_new() {
    // A new branch reports the null SHA; the diff falls back to the first parent
    let harness = Harness::new(
        FakeVcs::new()
            .commit("c1", &["src/client/delphi_epidata.py"])
            .commit("c2", &["docs/index.md"]),
    );

    let result = harness
        .run(RELEASE_HELPER, &push(release_gate::core::NULL_SHA, "c2"))
        .await;

    assert_eq!(result.status, ExecutionStatus::Completed, "{}", result.summary());
    assert!(matches!(
        result.skip_reason("release_python_client"),
        Some(SkipReason::GateClosed { .. })
    ));
}
