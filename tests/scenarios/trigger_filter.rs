//! Test: only a push to the primary branch starts a run

use crate::helpers::*;
use release_gate::core::{ExecutionStatus, JobState, TriggerContext};
use release_gate::execution::ExecutionEvent;

#[tokio::test]
async fn test_push_to_other_branch_is_not_triggered() {
    let harness = Harness::new(FakeVcs::new().commit("c1", &["src/client/delphi_epidata.py"]));
    let trigger = TriggerContext::push(OWNER, "dev", Some("c0"), "c1");

    let result = harness.run(RELEASE_HELPER, &trigger).await;

    assert_eq!(result.status, ExecutionStatus::NotTriggered);
    assert_eq!(result.status.exit_code(), 0);
    assert!(result
        .pipeline
        .jobs
        .values()
        .all(|j| matches!(j.state, JobState::Pending)));
    assert!(matches!(
        result.events.as_slice(),
        [ExecutionEvent::RunNotTriggered { .. }]
    ));
    assert!(harness.runner.calls().is_empty());
}

#[tokio::test]
async fn test_other_event_is_not_triggered() {
    let harness = Harness::new(FakeVcs::new());
    let mut trigger = push("c0", "c0");
    trigger.event = "pull_request".to_string();

    let result = harness.run(RELEASE_HELPER, &trigger).await;

    assert_eq!(result.status, ExecutionStatus::NotTriggered);
    assert!(result.started().is_empty());
    assert!(harness.vcs.pushes().is_empty());
}
