//! Test: the sync branch mirrors the primary tip and keeps one pull request open

use crate::helpers::*;
use release_gate::core::{ExecutionStatus, JobOutput};

#[tokio::test]
async fn test_sync_branch_matches_primary_tip() {
    let harness = Harness::new(
        FakeVcs::new()
            .commit("c1", &["README.md"])
            .commit("c2", &["src/client/delphi_epidata.py"]),
    );
    let primary_tip = harness.vcs.branch_tip("main").unwrap();

    let result = harness.run(RELEASE_HELPER, &push("c0", "c2")).await;

    assert_eq!(result.status, ExecutionStatus::Completed, "{}", result.summary());
    assert_eq!(
        harness.vcs.branch_tip("bot/sync-main-dev"),
        Some(primary_tip.clone())
    );
    // dev itself is only ever changed through the pull request
    assert_eq!(harness.vcs.branch_tip("dev").as_deref(), Some("c0"));

    let pulls = harness.host.pull_requests();
    assert_eq!(pulls.len(), 1);
    assert_eq!(pulls[0].head, "bot/sync-main-dev");
    assert_eq!(pulls[0].base, "dev");
    assert_eq!(pulls[0].reviewers, vec!["krivard"]);

    match result.state("sync_dev").output() {
        Some(JobOutput::Synced(outcome)) => {
            assert_eq!(outcome.sha, primary_tip);
            assert!(outcome.pull_request.created);
        }
        other => panic!("Expected sync output, got {:?}", other),
    }
}

#[tokio::test]
async fn test_second_run_reuses_pull_request() {
    let harness = Harness::new(FakeVcs::new().commit("c1", &["README.md"]));

    harness.run(RELEASE_HELPER, &push("c0", "c1")).await;
    let second = harness.run(RELEASE_HELPER, &push("c0", "c1")).await;

    assert_eq!(second.status, ExecutionStatus::Completed, "{}", second.summary());
    assert_eq!(harness.host.pull_requests().len(), 1);
    assert_eq!(harness.vcs.pushes().len(), 2);
    match second.state("sync_dev").output() {
        Some(JobOutput::Synced(outcome)) => assert!(!outcome.pull_request.created),
        other => panic!("Expected sync output, got {:?}", other),
    }
}

#[tokio::test]
async fn test_sync_runs_even_when_release_fails() {
    let harness = Harness::with_runner(
        FakeVcs::new().commit("c1", &["README.md"]),
        FakeRunner::failing_version(),
    );

    let result = harness.run(RELEASE_HELPER, &push("c0", "c1")).await;

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert!(result.succeeded("sync_dev"));
    assert_eq!(
        harness.vcs.branch_tip("bot/sync-main-dev").as_deref(),
        Some("c1")
    );
}
