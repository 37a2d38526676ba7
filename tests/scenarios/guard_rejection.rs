//! Test: the repository guard halts the run before anything else starts

use crate::helpers::*;
use release_gate::core::{ExecutionStatus, SkipReason, TriggerContext};

#[tokio::test]
async fn test_foreign_owner_aborts_without_side_effects() {
    let harness = Harness::new(FakeVcs::new().commit("c1", &["src/client/delphi_epidata.py"]));
    let trigger = TriggerContext::push("someone-else", "main", Some("c0"), "c1");

    let result = harness.run(RELEASE_HELPER, &trigger).await;

    assert_eq!(result.status, ExecutionStatus::Aborted, "{}", result.summary());
    assert_eq!(result.status.exit_code(), 2);
    assert!(result
        .error("correct_repository")
        .unwrap()
        .contains("someone-else"));

    // Only the guard ever started
    assert_eq!(result.started(), vec!["correct_repository"]);
    for job in [
        "client_changed",
        "create_release",
        "release_python_client",
        "release_js_client",
        "sync_dev",
    ] {
        assert_eq!(result.skip_reason(job), Some(&SkipReason::RunAborted), "{}", job);
    }

    assert!(harness.runner.calls().is_empty());
    assert!(harness.host.releases().is_empty());
    assert!(harness.host.pull_requests().is_empty());
    assert!(harness.vcs.pushes().is_empty());
    assert_eq!(harness.vcs.branch_tip("bot/sync-main-dev"), None);
}

#[tokio::test]
async fn test_owner_match_ignores_case() {
    let harness = Harness::new(FakeVcs::new().commit("c1", &["README.md"]));
    let trigger = TriggerContext::push("CMU-Delphi", "main", Some("c0"), "c1");

    let result = harness.run(RELEASE_HELPER, &trigger).await;

    assert_eq!(result.status, ExecutionStatus::Completed, "{}", result.summary());
    assert!(result.succeeded("correct_repository"));
}

#[tokio::test]
async fn test_reject_mode_blocks_upstream_owner() {
    let yaml = r#"
name: "fork-only"
jobs:
  - id: not_upstream
    guard:
      owner: cmu-delphi
      mode: reject

  - id: sync_dev
    needs: [not_upstream]
    sync_branch:
      branch: bot/sync-main-dev
      base: dev
      title: "chore: sync main->dev"
"#;
    let harness = Harness::new(FakeVcs::new());

    let upstream = harness.run(yaml, &push("c0", "c0")).await;
    assert_eq!(upstream.status, ExecutionStatus::Aborted);
    assert!(harness.vcs.pushes().is_empty());

    let fork = harness
        .run(yaml, &TriggerContext::push("a-fork", "main", None, "c0"))
        .await;
    assert_eq!(fork.status, ExecutionStatus::Completed, "{}", fork.summary());
    assert_eq!(harness.vcs.pushes().len(), 1);
}
