use proptest::prelude::*;

/// AND/OR mask pairs, biased towards the identity masks
pub fn mask_pair_strategy() -> impl Strategy<Value = (i64, i64)> {
    prop_oneof![
        1 => Just((-1_i64, 0_i64)),
        4 => (any::<i64>(), any::<i64>()),
    ]
}

/// Sequences of mask pairs applied one after another
pub fn mask_chain_strategy() -> impl Strategy<Value = Vec<(i64, i64)>> {
    prop::collection::vec(mask_pair_strategy(), 1..8)
}

/// Batch sizes with a subset of indices destined to fail
pub fn batch_with_failures_strategy() -> impl Strategy<Value = (usize, Vec<usize>)> {
    (1usize..12).prop_flat_map(|size| {
        (
            Just(size),
            prop::collection::vec(0..size, 0..=size).prop_map(|mut idx| {
                idx.sort_unstable();
                idx.dedup();
                idx
            }),
        )
    })
}
