//! Retry requests against failed and in-progress orchestrations.

#![allow(clippy::expect_used, clippy::unwrap_used)]

mod common;

use chrono::{Duration, Utc};

use kcp_core::{OperationId, OrchestrationId};
use kcp_orchestration::error::Error;
use kcp_orchestration::operation::RuntimeOperation;
use kcp_orchestration::orchestration::{Orchestration, Parameters, State};
use kcp_orchestration::store::{OperationStore, OrchestrationStore};

use common::{operation_at, Harness};

/// Inserts an orchestration in `state` with one failed operation per runtime.
async fn failed_run(
    harness: &Harness,
    state: State,
    runtimes: &[&str],
) -> (Orchestration, Vec<RuntimeOperation>) {
    let mut orchestration = harness.create(Parameters::default()).await;
    orchestration.transition_to(State::InProgress, "Scheduled operations").unwrap();
    if state == State::Failed {
        orchestration.transition_to(State::Failed, "operations failed").unwrap();
    }
    harness.orchestrations.update(&orchestration).await.unwrap();

    let created = Utc::now() - Duration::hours(2);
    let mut operations = Vec::new();
    for runtime in runtimes {
        let mut op = operation_at(&orchestration.id, runtime, None, created);
        op.state = State::Failed;
        harness.operations.insert_operation(&op).await.unwrap();
        operations.push(op);
    }
    (orchestration, operations)
}

async fn newer_operation(harness: &Harness, runtime: &str, state: State) {
    let mut op = operation_at(&OrchestrationId::new("later"), runtime, None, Utc::now());
    op.state = state;
    harness.operations.insert_operation(&op).await.unwrap();
}

async fn state_of(harness: &Harness, id: &OperationId) -> State {
    harness.operations.get_operation_by_id(id).await.unwrap().state
}

#[tokio::test]
async fn superseded_operations_are_reported_as_old() {
    let harness = Harness::new();
    let (orchestration, failed) = failed_run(&harness, State::Failed, &["rt-1", "rt-2"]).await;
    newer_operation(&harness, "rt-1", State::Succeeded).await;

    let response = harness
        .retry_engine()
        .retry(&orchestration, &failed, &[])
        .await
        .unwrap();

    assert_eq!(response.orchestration_id, orchestration.id);
    assert_eq!(response.old_operations, vec![failed[0].id.clone()]);
    assert_eq!(response.retry_operations, vec![failed[1].id.clone()]);
    assert!(response.invalid_operations.is_empty());
    assert_eq!(state_of(&harness, &failed[0].id).await, State::Failed);
    assert_eq!(state_of(&harness, &failed[1].id).await, State::Retrying);

    let stored = harness.orchestration(&orchestration.id).await;
    assert_eq!(stored.state, State::Retrying);
    assert_eq!(
        stored.parameters.retry_operation.retry_operations,
        vec![failed[1].id.clone()]
    );
    assert_eq!(harness.queue.ready().unwrap(), vec![orchestration.id]);
}

#[tokio::test]
async fn newer_canceled_operations_do_not_supersede() {
    let harness = Harness::new();
    let (orchestration, failed) = failed_run(&harness, State::Failed, &["rt-1"]).await;
    newer_operation(&harness, "rt-1", State::Canceled).await;

    let response = harness
        .retry_engine()
        .retry(&orchestration, &failed, &[])
        .await
        .unwrap();

    assert_eq!(response.retry_operations, vec![failed[0].id.clone()]);
    assert!(response.old_operations.is_empty());
}

#[tokio::test]
async fn unknown_ids_are_invalid() {
    let harness = Harness::new();
    let (orchestration, failed) = failed_run(&harness, State::Failed, &["rt-1", "rt-2"]).await;
    let bogus = OperationId::new("bogus");

    let response = harness
        .retry_engine()
        .retry(&orchestration, &failed, &[failed[1].id.clone(), bogus.clone()])
        .await
        .unwrap();

    assert_eq!(response.retry_operations, vec![failed[1].id.clone()]);
    assert_eq!(response.invalid_operations, vec![bogus]);
    assert_eq!(state_of(&harness, &failed[0].id).await, State::Failed);
}

#[tokio::test]
async fn nothing_to_retry_leaves_the_orchestration_untouched() {
    let harness = Harness::new();
    let (orchestration, _) = failed_run(&harness, State::Failed, &["rt-1"]).await;

    let response = harness
        .retry_engine()
        .retry(&orchestration, &[], &[OperationId::new("bogus")])
        .await
        .unwrap();

    assert!(response.retry_operations.is_empty());
    assert_eq!(response.invalid_operations.len(), 1);
    assert!(!response.msg.is_empty());
    assert_eq!(harness.orchestration(&orchestration.id).await.state, State::Failed);
    assert!(harness.queue.ready().unwrap().is_empty());
}

#[tokio::test]
async fn in_progress_retry_keeps_state_and_skips_staleness() {
    let harness = Harness::new();
    let (orchestration, failed) = failed_run(&harness, State::InProgress, &["rt-1"]).await;
    newer_operation(&harness, "rt-1", State::Succeeded).await;

    let response = harness
        .retry_engine()
        .retry_with(&orchestration, &failed, &[], true)
        .await
        .unwrap();

    assert_eq!(response.retry_operations, vec![failed[0].id.clone()]);
    let stored = harness.orchestration(&orchestration.id).await;
    assert_eq!(stored.state, State::InProgress);
    assert!(stored.parameters.retry_operation.immediate);
    assert!(harness.queue.ready().unwrap().is_empty());
}

#[tokio::test]
async fn canceled_meanwhile_is_a_conflict() {
    let harness = Harness::new();
    let (orchestration, failed) = failed_run(&harness, State::Failed, &["rt-1"]).await;
    harness.canceler().cancel(&orchestration.id).await.unwrap();

    let err = harness
        .retry_engine()
        .retry(&orchestration, &failed, &[])
        .await
        .unwrap_err();

    assert!(matches!(err, Error::OrchestrationCanceled { .. }));
}

#[tokio::test]
async fn only_failed_or_in_progress_orchestrations_can_be_retried() {
    let harness = Harness::new();
    let mut orchestration = harness.create(Parameters::default()).await;
    let err = harness
        .retry_engine()
        .retry(&orchestration, &[], &[])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    orchestration.transition_to(State::Succeeded, "Scheduled 0 operations").unwrap();
    let err = harness
        .retry_engine()
        .retry(&orchestration, &[], &[])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}
