//! Transition executor behaviour against in-memory collaborators

mod common;

use common::*;
use serde_json::json;
use std::sync::Arc;

use statepath::graph::{EntityState, GraphBuilder, NodeKey, PathDefinition};
use statepath::state_machine::{
    ActionError, ActionPhase, Arguments, PersistenceError, Principal, RoleAccessGate,
    StateMachineError, TransitionRecord, TransitionRequest,
};

#[tokio::test]
async fn test_execute_applies_state_and_masks() {
    let h = payment_harness();
    let mut payment = Payment::new(h.state("pending"), 100).with_stamp(0x10);
    h.session.seed_object(payment.clone());

    let path = h.executor.resolve_path("approve").await.unwrap();
    let record = h
        .executor
        .execute(&clerk(), &mut payment, TransitionRequest::new(path))
        .await
        .unwrap();

    assert_eq!(payment.state_id, h.state("approved"));
    assert_eq!(payment.change_stamp, 0x11);
    assert_eq!(payment.notes, vec!["audit:approve".to_string()]);

    let transition = record.transition();
    assert_eq!(transition.previous_state_id, h.state("pending"));
    assert_eq!(transition.next_state_id, h.state("approved"));
    assert_eq!(transition.change_stamp_before, 0x10);
    assert_eq!(transition.change_stamp_after, Some(0x11));
    assert_eq!(transition.owner_id, clerk().user_id);
    assert!(transition.is_complete());

    assert_eq!(h.session.object(payment.id), Some(payment.clone()));
    assert_eq!(h.session.transitions(), vec![record]);
    assert_eq!(h.session.commit_count(), 1);
}

#[tokio::test]
async fn test_incompatible_state_is_rejected_without_side_effects() {
    let h = payment_harness();
    let mut payment = h.seeded_payment("approved", 100);
    let original = payment.clone();

    let err = h
        .executor
        .execute_by_code(&clerk(), &mut payment, "approve", Arguments::new())
        .await
        .unwrap_err();

    match err {
        StateMachineError::IncompatibleState {
            path,
            expected,
            actual,
        } => {
            assert_eq!(path, "approve");
            assert_eq!(expected, "pending");
            assert_eq!(actual, h.state("approved"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(payment, original);
    assert!(h.session.transitions().is_empty());
    assert_eq!(h.session.commit_count(), 0);
}

#[tokio::test]
async fn test_failed_post_action_rolls_back_everything() {
    let h = payment_harness();
    let mut payment = h.seeded_payment("pending", 250);
    let original = payment.clone();

    let err = h
        .executor
        .execute_by_code(&clerk(), &mut payment, "explode", Arguments::new())
        .await
        .unwrap_err();

    assert!(matches!(
        &err,
        StateMachineError::ActionFailed {
            action,
            phase: ActionPhase::Post,
            source: ActionError::Rejected { .. },
        } if action == "explode"
    ));
    assert_eq!(err.code(), "ACTION_FAILED");

    // in-memory edits made before the failure are gone too
    assert_eq!(payment, original);
    assert_eq!(h.session.object(payment.id), Some(original));
    assert!(h.session.transitions().is_empty());
    assert_eq!(h.session.rollback_count(), 1);
    assert_eq!(h.hook_log(), vec![format!("rollback:{}", payment.id)]);
}

#[tokio::test]
async fn test_commit_failure_restores_object_and_runs_rollback_hooks() {
    let h = payment_harness();
    let mut payment = h.seeded_payment("pending", 100);
    let original = payment.clone();
    h.session.fail_next_commit();

    let err = h
        .executor
        .execute_by_code(&clerk(), &mut payment, "confirm", Arguments::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        StateMachineError::Persistence(PersistenceError::Backend { .. })
    ));
    assert!(err.is_retryable());
    assert_eq!(payment, original);
    assert_eq!(h.session.object(payment.id), Some(original));
    assert_eq!(h.hook_log(), vec![format!("rollback:{}", payment.id)]);
}

#[tokio::test]
async fn test_commit_hooks_run_after_success() {
    let h = payment_harness();
    let mut payment = h.seeded_payment("pending", 100);

    h.executor
        .execute_by_code(&clerk(), &mut payment, "confirm", Arguments::new())
        .await
        .unwrap();

    assert_eq!(payment.state_id, h.state("approved"));
    assert_eq!(h.hook_log(), vec![format!("commit:{}", payment.id)]);
}

#[tokio::test]
async fn test_access_gate_denies_before_anything_runs() {
    let gate = RoleAccessGate::new(true).require("approve", "approver");
    let h = payment_harness_with_gate(Arc::new(gate));
    let mut payment = h.seeded_payment("pending", 100);
    let path = h.executor.resolve_path("approve").await.unwrap();

    assert!(!h.executor.can_execute(&clerk(), &payment, &path).await);
    let err = h
        .executor
        .execute(&clerk(), &mut payment, TransitionRequest::new(path.clone()))
        .await
        .unwrap_err();
    assert!(matches!(err, StateMachineError::AccessDenied { .. }));
    assert!(err.is_user_facing());
    assert_eq!(h.session.commit_count() + h.session.rollback_count(), 0);

    let approver = Principal::new(2, "approver").with_role("approver");
    h.executor
        .execute(&approver, &mut payment, TransitionRequest::new(path))
        .await
        .unwrap();
    assert_eq!(payment.state_id, h.state("approved"));
}

#[tokio::test]
async fn test_arguments_are_validated_before_the_transaction() {
    let h = payment_harness();
    let mut payment = h.seeded_payment("approved", 100);

    let err = h
        .executor
        .execute_by_code(&clerk(), &mut payment, "settle", Arguments::new())
        .await
        .unwrap_err();
    match err {
        StateMachineError::ArgumentValidation { path, errors } => {
            assert_eq!(path, "settle");
            assert_eq!(errors["approver"], vec!["required".to_string()]);
            assert!(!errors.contains_key("limit"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(h.session.commit_count() + h.session.rollback_count(), 0);

    let mut args = Arguments::new();
    args.insert("approver".to_string(), json!("sam"));
    args.insert("limit".to_string(), json!("ten"));
    let errors = h
        .executor
        .validate_arguments_by_code("settle", &args)
        .await
        .unwrap();
    assert!(errors["limit"][0].starts_with("expected"));

    args.remove("limit");
    assert!(h
        .executor
        .validate_arguments_by_code("settle", &args)
        .await
        .unwrap()
        .is_empty());

    h.executor
        .execute_by_code(&clerk(), &mut payment, "settle", args)
        .await
        .unwrap();
    assert_eq!(payment.state_id, h.state("settled"));
    assert_eq!(payment.change_stamp, 0x02);
    assert_eq!(
        payment.notes,
        vec!["checked_by:sam".to_string(), "audit:settle".to_string()]
    );
}

#[tokio::test]
async fn test_pre_action_rejection_reports_pre_phase() {
    let h = payment_harness();
    let mut payment = h.seeded_payment("approved", 5_000);

    let err = h
        .executor
        .execute(
            &clerk(),
            &mut payment,
            TransitionRequest::new(h.executor.resolve_path("settle").await.unwrap())
                .with_argument("approver", json!("sam")),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        StateMachineError::ActionFailed {
            phase: ActionPhase::Pre,
            ..
        }
    ));
    assert!(err.to_string().starts_with("pre-action 'check_amount' failed"));
    assert_eq!(payment.state_id, h.state("approved"));
}

#[tokio::test]
async fn test_stale_path_configuration_is_rejected() {
    let h = payment_harness();
    let mut payment = h.seeded_payment("pending", 100);
    let cached = h.executor.resolve_path("approve").await.unwrap();

    let mut edited = cached.as_ref().clone();
    edited.or_mask = 0x40;
    h.graph.update_path(edited);

    let err = h
        .executor
        .execute(&clerk(), &mut payment, TransitionRequest::new(cached.clone()))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StateMachineError::StalePathConfiguration {
            state: EntityState::Modified,
            ..
        }
    ));

    h.graph.remove_path(cached.id);
    let err = h
        .executor
        .execute(&clerk(), &mut payment, TransitionRequest::new(cached))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StateMachineError::StalePathConfiguration {
            state: EntityState::Deleted,
            ..
        }
    ));
    assert_eq!(payment.state_id, h.state("pending"));
}

#[tokio::test]
async fn test_path_of_foreign_record_type_is_rejected() {
    let h = payment_harness();
    let mut payment = h.seeded_payment("pending", 100);
    let foreign = GraphBuilder::new("invoices", "invoice_transition")
        .state("pending", None)
        .state("approved", None)
        .path(PathDefinition::new("approve", "pending", "approved"))
        .build(100)
        .unwrap();
    let path = Arc::new(foreign.path("approve").unwrap().clone());

    let err = h
        .executor
        .execute(&clerk(), &mut payment, TransitionRequest::new(path))
        .await
        .unwrap_err();
    match err {
        StateMachineError::GraphMismatch {
            expected, found, ..
        } => {
            assert_eq!(expected, "state_transition");
            assert_eq!(found, "invoice_transition");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_unknown_action_name_fails_resolution() {
    let h = payment_harness();
    let mut payment = h.seeded_payment("pending", 100);

    let mut edited = h.definition.path("reject").unwrap().clone();
    edited.post_actions.push("notify".to_string());
    h.graph.update_path(edited);

    let err = h
        .executor
        .execute_by_code(&clerk(), &mut payment, "reject", Arguments::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StateMachineError::UnknownAction { ref action, .. } if action == "notify"
    ));
}

#[tokio::test]
async fn test_unsaved_edits_are_kept_and_persisted() {
    let h = payment_harness();
    let mut payment = h.seeded_payment("pending", 100);
    payment.notes.push("edited".to_string());

    h.executor
        .execute_by_code(&clerk(), &mut payment, "approve", Arguments::new())
        .await
        .unwrap();

    let stored = h.session.object(payment.id).unwrap();
    assert_eq!(
        stored.notes,
        vec!["edited".to_string(), "audit:approve".to_string()]
    );
}

#[tokio::test]
async fn test_untracked_object_can_transition() {
    let h = payment_harness();
    let mut payment = Payment::new(h.state("pending"), 100);

    h.executor
        .execute_by_code(&clerk(), &mut payment, "reject", Arguments::new())
        .await
        .unwrap();

    assert_eq!(h.session.object(payment.id).unwrap().state_id, h.state("rejected"));
}

#[tokio::test]
async fn test_outdated_copy_is_refreshed_before_the_state_check() {
    let h = payment_harness();
    let mut payment = h.seeded_payment("pending", 100);
    let mut outdated = payment.clone();

    h.executor
        .execute_by_code(&clerk(), &mut payment, "approve", Arguments::new())
        .await
        .unwrap();

    let err = h
        .executor
        .execute_by_code(&clerk(), &mut outdated, "approve", Arguments::new())
        .await
        .unwrap_err();
    assert!(matches!(err, StateMachineError::IncompatibleState { .. }));
    assert_eq!(outdated, payment);
    assert_eq!(h.session.transitions().len(), 1);
    assert_eq!(h.session.object(payment.id), Some(payment));
}

#[tokio::test]
async fn test_edited_outdated_copy_cannot_overwrite_newer_state() {
    let h = payment_harness();
    let mut payment = h.seeded_payment("pending", 100);
    let mut outdated = payment.clone();

    h.executor
        .execute_by_code(&clerk(), &mut payment, "approve", Arguments::new())
        .await
        .unwrap();

    outdated.notes.push("edited".to_string());
    let before = outdated.clone();
    let err = h
        .executor
        .execute_by_code(&clerk(), &mut outdated, "reject", Arguments::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        StateMachineError::Persistence(PersistenceError::ConcurrentModification { .. })
    ));
    assert_eq!(outdated, before);
    assert_eq!(h.session.transitions().len(), 1);
    assert_eq!(h.session.object(payment.id), Some(payment));
}

#[tokio::test]
async fn test_edited_path_definition_replaces_the_cached_one() {
    let h = payment_harness();
    let mut first = h.seeded_payment("pending", 100);
    h.executor
        .execute_by_code(&clerk(), &mut first, "approve", Arguments::new())
        .await
        .unwrap();
    assert_eq!(first.change_stamp, 0x01);

    let mut edited = h.definition.path("approve").unwrap().clone();
    edited.or_mask = 0x40;
    h.graph.update_path(edited);

    for _ in 0..3 {
        let mut payment = h.seeded_payment("pending", 100);
        h.executor
            .execute_by_code(&clerk(), &mut payment, "approve", Arguments::new())
            .await
            .unwrap();
        assert_eq!(payment.change_stamp, 0x40);
    }
    assert_eq!(h.graph.path_load_count(&NodeKey::from("approve")), 2);
}

#[tokio::test]
async fn test_deleted_path_definition_is_not_found_after_eviction() {
    let h = payment_harness();
    let mut payment = h.seeded_payment("pending", 100);
    let cached = h.executor.resolve_path("approve").await.unwrap();
    h.graph.remove_path(cached.id);

    let err = h
        .executor
        .execute_by_code(&clerk(), &mut payment, "approve", Arguments::new())
        .await
        .unwrap_err();
    assert!(matches!(err, StateMachineError::PathNotFound { .. }));
    assert_eq!(payment.state_id, h.state("pending"));
}
