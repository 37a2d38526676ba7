//! Test: re-running a release that already went out does not fail

use crate::helpers::*;
use release_gate::core::{ExecutionStatus, PublishStatus};

#[tokio::test]
async fn test_rerun_treats_published_version_as_success() {
    let harness = Harness::new(FakeVcs::new().commit("c1", &["src/client/delphi_epidata.py"]));
    let trigger = push("c0", "c1");

    let first = harness.run(RELEASE_HELPER, &trigger).await;
    assert_eq!(first.status, ExecutionStatus::Completed, "{}", first.summary());

    let second = harness.run(RELEASE_HELPER, &trigger).await;
    assert_eq!(second.status, ExecutionStatus::Completed, "{}", second.summary());
    assert_eq!(second.status.exit_code(), 0);

    let python = second.published("release_python_client");
    assert_eq!(python.status, PublishStatus::AlreadyPublished);
    assert!(python.uploaded.is_empty());
    assert_eq!(python.existing, PYPI_ARTIFACTS);

    let npm = second.published("release_js_client");
    assert_eq!(npm.status, PublishStatus::AlreadyPublished);
    assert_eq!(npm.existing, vec![NPM_ARTIFACT]);

    // One release, each asset attached once
    assert_eq!(harness.host.releases().len(), 1);
    assert_eq!(harness.host.assets("v4.1.0").len(), 3);
    assert_eq!(harness.runner.calls_to("twine upload").len(), 2);
}

#[tokio::test]
async fn test_conflict_fails_when_skip_existing_is_off() {
    let yaml = RELEASE_HELPER.replace(
        "      publish: \"npm publish --access public\"",
        "      publish: \"npm publish --access public\"\n      skip_existing: false",
    );
    assert_ne!(yaml, RELEASE_HELPER);

    let harness = Harness::new(FakeVcs::new().commit("c1", &["src/client/delphi_epidata.py"]));
    let trigger = push("c0", "c1");

    let first = harness.run(&yaml, &trigger).await;
    assert_eq!(first.status, ExecutionStatus::Completed, "{}", first.summary());

    let second = harness.run(&yaml, &trigger).await;
    assert_eq!(second.status, ExecutionStatus::Failed, "{}", second.summary());
    assert_eq!(second.status.exit_code(), 1);
    assert!(second
        .error("release_js_client")
        .unwrap()
        .contains(NPM_ARTIFACT));

    // The other publisher is independent of the failure
    assert_eq!(
        second.published("release_python_client").status,
        PublishStatus::AlreadyPublished
    );
    assert!(second.succeeded("sync_dev"));
}
