mod common;

use common::strategies::*;
use common::*;
use proptest::prelude::*;

use statepath::graph::{GraphBuilder, PathDefinition, IDENTITY_AND_MASK, IDENTITY_OR_MASK};
use statepath::state_machine::{Arguments, BatchExecutor, StateMachineError};

fn masked_path(and_mask: i64, or_mask: i64) -> statepath::StatePath {
    GraphBuilder::new("g", "state_transition")
        .state("a", None)
        .state("b", None)
        .path(PathDefinition::new("p", "a", "b").masks(and_mask, or_mask))
        .build(1)
        .unwrap()
        .paths
        .remove(0)
}

proptest! {
    /// Property: the identity masks never change a stamp
    #[test]
    fn identity_masks_preserve_stamp(stamp in any::<i64>()) {
        let path = masked_path(IDENTITY_AND_MASK, IDENTITY_OR_MASK);
        prop_assert_eq!(path.apply_masks(stamp), stamp);
    }

    /// Property: bits set by OR are always present, bits cleared by AND are
    /// absent unless OR sets them again
    #[test]
    fn masks_set_and_clear_bits((and_mask, or_mask) in mask_pair_strategy(), stamp in any::<i64>()) {
        let next = masked_path(and_mask, or_mask).apply_masks(stamp);
        prop_assert_eq!(next & or_mask, or_mask);
        prop_assert_eq!(next & !and_mask & !or_mask, 0);
    }

    /// Property: a chain of paths is the left fold of its masks
    #[test]
    fn mask_chain_is_a_fold(chain in mask_chain_strategy(), stamp in any::<i64>()) {
        let expected = chain.iter().fold(stamp, |s, (and_mask, or_mask)| (s & and_mask) | or_mask);
        let actual = chain
            .iter()
            .map(|(and_mask, or_mask)| masked_path(*and_mask, *or_mask))
            .fold(stamp, |s, path| path.apply_masks(s));
        prop_assert_eq!(actual, expected);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: executing `approve` always yields `(stamp & 0xFF) | 0x01`
    #[test]
    fn executed_stamp_matches_masks(stamp in any::<i64>()) {
        let (state, change_stamp) = tokio_test::block_on(async {
            let h = payment_harness();
            let mut payment = Payment::new(h.state("pending"), 10).with_stamp(stamp);
            h.session.seed_object(payment.clone());
            h.executor
                .execute_by_code(&clerk(), &mut payment, "approve", Arguments::new())
                .await
                .unwrap();
            (payment.state_id == h.state("approved"), payment.change_stamp)
        });
        prop_assert!(state);
        prop_assert_eq!(change_stamp, (stamp & 0xFF) | 0x01);
    }

    /// Property: objects outside the previous state never transition
    #[test]
    fn incompatible_objects_are_untouched(
        start in prop::sample::select(vec!["approved", "settled", "rejected"]),
        stamp in any::<i64>(),
    ) {
        let (unchanged, incompatible) = tokio_test::block_on(async {
            let h = payment_harness();
            let mut payment = Payment::new(h.state(start), 10).with_stamp(stamp);
            h.session.seed_object(payment.clone());
            let before = payment.clone();
            let err = h
                .executor
                .execute_by_code(&clerk(), &mut payment, "approve", Arguments::new())
                .await
                .unwrap_err();
            (
                payment == before,
                matches!(err, StateMachineError::IncompatibleState { .. }),
            )
        });
        prop_assert!(unchanged);
        prop_assert!(incompatible);
    }

    /// Property: a batch reports exactly the seeded failures
    #[test]
    fn batch_failures_are_isolated((size, failing) in batch_with_failures_strategy()) {
        let (succeeded, failed_indices) = tokio_test::block_on(async {
            let h = payment_harness();
            let payments: Vec<Payment> = (0..size)
                .map(|i| {
                    let state = if failing.contains(&i) { "settled" } else { "pending" };
                    h.seeded_payment(state, 10)
                })
                .collect();

            let path = h.executor.resolve_path("approve").await.unwrap();
            let results = BatchExecutor::new(h.executor.clone())
                .execute_batch(&clerk(), payments, path, Arguments::new())
                .await
                .unwrap();

            let failed: Vec<usize> = results
                .iter()
                .enumerate()
                .filter(|(_, r)| !r.is_success())
                .map(|(i, _)| i)
                .collect();
            (results.len() - failed.len(), failed)
        });
        prop_assert_eq!(succeeded, size - failing.len());
        prop_assert_eq!(failed_indices, failing);
    }
}
