//! Test: failures reach other jobs only through `needs`

use crate::helpers::*;
use release_gate::core::{ExecutionStatus, SkipReason};

#[tokio::test]
async fn test_release_failure_skips_publishers() {
    let harness = Harness::with_runner(
        FakeVcs::new().commit("c1", &["src/client/delphi_epidata.py"]),
        FakeRunner::failing_version(),
    );

    let result = harness.run(RELEASE_HELPER, &push("c0", "c1")).await;

    assert_eq!(result.status, ExecutionStatus::Failed, "{}", result.summary());
    assert_eq!(result.status.exit_code(), 1);
    assert!(result
        .error("create_release")
        .unwrap()
        .contains("no configuration file found"));

    let upstream_failed = SkipReason::UpstreamFailed {
        job: "create_release".to_string(),
    };
    assert_eq!(result.skip_reason("release_js_client"), Some(&upstream_failed));
    assert_eq!(
        result.skip_reason("release_python_client"),
        Some(&upstream_failed)
    );

    assert!(result.succeeded("client_changed"));
    assert!(harness.host.releases().is_empty());
    assert!(harness.runner.calls_to("npm").is_empty());
    assert!(harness.runner.calls_to("twine").is_empty());
}

#[tokio::test]
async fn test_publisher_without_registry_command_only_uploads() {
    let yaml = r#"
name: "upload-only"
jobs:
  - id: guard
    guard:
      owner: cmu-delphi

  - id: changes
    needs: [guard]
    detect_changes:
      filters:
        python: ["src/client/**"]

  - id: release
    needs: [guard]
    release:
      version_command: "bump2version --dry-run --list major"

  - id: python
    needs: [changes, release]
    when:
      changed: changes.python
    publish:
      channel: pypi
      workdir: src/client/packaging/pypi
      artifacts: ["dist/*"]
"#;
    let harness = Harness::new(FakeVcs::new().commit("c1", &["src/client/delphi_epidata.py"]));

    let result = harness.run(yaml, &push("c0", "c1")).await;

    assert_eq!(result.status, ExecutionStatus::Completed, "{}", result.summary());
    assert_eq!(
        result.published("python").status,
        release_gate::core::PublishStatus::UploadOnly
    );
    assert_eq!(harness.host.assets("v4.1.0"), PYPI_ARTIFACTS);
    assert!(harness.runner.calls_to("twine").is_empty());
}
