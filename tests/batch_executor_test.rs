//! Batch execution: one transaction per object, failures stay isolated

mod common;

use common::*;
use std::sync::Arc;

use statepath::state_machine::{Arguments, BatchExecutor, StateMachineError};

#[tokio::test]
async fn test_failing_item_does_not_affect_the_others() {
    let h = payment_harness();
    let batch = BatchExecutor::new(h.executor.clone());

    let mut payments: Vec<Payment> = (0..4).map(|_| h.seeded_payment("pending", 100)).collect();
    payments.insert(2, h.seeded_payment("settled", 100));
    let ids: Vec<_> = payments.iter().map(|p| p.id).collect();

    let path = h.executor.resolve_path("approve").await.unwrap();
    let results = batch
        .execute_batch(&clerk(), payments, path, Arguments::new())
        .await
        .unwrap();

    assert_eq!(results.len(), 5);
    assert_eq!(results.iter().filter(|r| r.is_success()).count(), 4);

    let failed = &results[2];
    assert_eq!(failed.object.id, ids[2]);
    assert_eq!(failed.object.state_id, h.state("settled"));
    assert!(failed.transition.is_none());
    assert!(matches!(
        failed.error,
        Some(StateMachineError::IncompatibleState { .. })
    ));

    for (index, result) in results.iter().enumerate().filter(|(i, _)| *i != 2) {
        assert_eq!(result.object.id, ids[index]);
        assert_eq!(result.object.state_id, h.state("approved"));
        assert!(result.transition.is_some());
        assert_eq!(
            h.session.object(ids[index]).unwrap().state_id,
            h.state("approved")
        );
    }
    assert_eq!(h.session.transitions().len(), 4);
}

#[tokio::test]
async fn test_action_failures_roll_back_per_item() {
    let h = payment_harness();
    let batch = BatchExecutor::new(h.executor.clone());
    let payments: Vec<Payment> = (0..3).map(|_| h.seeded_payment("pending", 100)).collect();

    let path = h.executor.resolve_path("explode").await.unwrap();
    let results = batch
        .execute_batch(&clerk(), payments.clone(), path, Arguments::new())
        .await
        .unwrap();

    assert!(results.iter().all(|r| !r.is_success()));
    for (result, original) in results.iter().zip(&payments) {
        assert_eq!(&result.object, original);
    }
    assert!(h.session.transitions().is_empty());
    assert_eq!(h.session.rollback_count(), 3);
    assert_eq!(h.hook_log().len(), 3);
}

#[tokio::test]
async fn test_stale_path_fails_the_whole_batch() {
    let h = payment_harness();
    let batch = BatchExecutor::new(h.executor.clone());
    let payments = vec![h.seeded_payment("pending", 100)];

    let path = h.executor.resolve_path("approve").await.unwrap();
    let mut edited = path.as_ref().clone();
    edited.and_mask = 0x0F;
    h.graph.update_path(edited);

    let err = batch
        .execute_batch(&clerk(), payments, path, Arguments::new())
        .await
        .unwrap_err();
    assert!(matches!(err, StateMachineError::StalePathConfiguration { .. }));
    assert!(h.session.transitions().is_empty());
}

#[tokio::test]
async fn test_path_unknown_to_the_engine_cache_fails_the_whole_batch() {
    let h = payment_harness();
    let batch = BatchExecutor::new(h.executor.clone());
    let payments = vec![h.seeded_payment("pending", 100)];

    // cache the current definition, then persist a newer one behind its back
    let cached = h.executor.resolve_path("approve").await.unwrap();
    let mut edited = cached.as_ref().clone();
    edited.or_mask = 0x08;
    h.graph.update_path(edited.clone());

    let err = batch
        .execute_batch(&clerk(), payments, Arc::new(edited), Arguments::new())
        .await
        .unwrap_err();
    assert!(matches!(err, StateMachineError::UnknownPath { ref path } if path == "approve"));

    h.executor.cache().invalidate_path(&cached).await;
    let payments = vec![h.seeded_payment("pending", 100)];
    let fresh = h.executor.resolve_path("approve").await.unwrap();
    let results = batch
        .execute_batch(&clerk(), payments, fresh, Arguments::new())
        .await
        .unwrap();
    assert_eq!(results[0].object.change_stamp, 0x08);
}
