//! Property tests for the allocation-count, LIFO reuse and addressing laws of `SlotPool`.
#![allow(
    clippy::undocumented_unsafe_blocks,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    reason = "test code doesn't need the same safety rigor as production code"
)]

use std::num::NonZero;
use std::ptr::NonNull;

use fixed_pool::{CACHE_LINE_SIZE, SlotPool};
use proptest::prelude::*;

fn pool(entry_size: usize, max_entries: usize) -> SlotPool {
    SlotPool::new(
        NonZero::new(entry_size).unwrap(),
        NonZero::new(max_entries).unwrap(),
    )
}

fn release_all(pool: &mut SlotPool, slots: Vec<NonNull<u8>>) {
    for slot in slots {
        unsafe { pool.deallocate(slot) };
    }
}

#[derive(Clone, Debug)]
enum Op {
    Allocate,
    /// Frees the live slot at this position (modulo the number of live slots).
    Free(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![Just(Op::Allocate), any::<usize>().prop_map(Op::Free)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn allocation_count_matches_successful_allocations(
        entry_size in 4_usize..96,
        max_entries in 1_usize..160,
        k_ratio in 0.0_f64..=1.0,
    ) {
        #[expect(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            clippy::cast_precision_loss,
            reason = "small test values"
        )]
        let k = ((max_entries as f64) * k_ratio).round() as usize;

        let mut pool = pool(entry_size, max_entries);
        let mut slots = Vec::with_capacity(k);

        for _ in 0..k {
            slots.push(pool.allocate().unwrap());
        }

        let stats = pool.stats();
        prop_assert_eq!(stats.allocation_count(), k);
        prop_assert_eq!(stats.block_count(), 1);

        let extra = pool.allocate();
        prop_assert_eq!(extra.is_some(), k < max_entries);
        slots.extend(extra);

        release_all(&mut pool, slots);
        prop_assert!(pool.is_empty());
    }

    #[test]
    fn reuse_matches_stack_model(
        entry_size in 4_usize..40,
        max_entries in 1_usize..48,
        ops in prop::collection::vec(op(), 0..256),
    ) {
        let mut pool = pool(entry_size, max_entries);

        // Top of the stack is the end of the Vec.
        let mut model_free = (0..max_entries).rev().collect::<Vec<_>>();
        let mut live: Vec<NonNull<u8>> = Vec::new();

        for op in ops {
            match op {
                Op::Allocate => {
                    let expected = model_free.pop();
                    let actual = pool.allocate();

                    prop_assert_eq!(actual.map(|slot| pool.index_of(slot)), expected);
                    live.extend(actual);
                }
                Op::Free(position) => {
                    if live.is_empty() {
                        continue;
                    }

                    let slot = live.swap_remove(position % live.len());
                    model_free.push(pool.index_of(slot));
                    unsafe { pool.deallocate(slot) };
                }
            }

            prop_assert_eq!(pool.len(), live.len());
            prop_assert_eq!(pool.free_count(), model_free.len());
        }

        release_all(&mut pool, live);
    }

    #[test]
    fn slots_are_reachable_from_aligned_base(
        entry_size in 4_usize..200,
        max_entries in 1_usize..64,
    ) {
        let mut pool = pool(entry_size, max_entries);

        let slots = (0..max_entries)
            .map(|_| pool.allocate().unwrap())
            .collect::<Vec<_>>();

        let base = slots[0].as_ptr().addr();
        prop_assert_eq!(base % CACHE_LINE_SIZE, 0);

        for (index, slot) in slots.iter().enumerate() {
            prop_assert_eq!(slot.as_ptr().addr(), base + index * entry_size);
            prop_assert_eq!(pool.slot_ptr(index), *slot);
        }

        release_all(&mut pool, slots);
    }

    #[test]
    fn content_is_stable_under_unrelated_churn(
        max_entries in 2_usize..32,
        churn in prop::collection::vec(any::<bool>(), 1..64),
    ) {
        let mut pool = pool(8, max_entries);

        let keeper = pool.allocate().unwrap();
        unsafe { keeper.cast::<u64>().write(0x0123_4567_89AB_CDEF) };

        let mut others = Vec::new();

        for allocate in churn {
            if allocate {
                if let Some(slot) = pool.allocate() {
                    unsafe { slot.cast::<u64>().write(u64::MAX) };
                    others.push(slot);
                }
            } else if let Some(slot) = others.pop() {
                unsafe { pool.deallocate(slot) };
            }

            prop_assert_eq!(unsafe { keeper.cast::<u64>().read() }, 0x0123_4567_89AB_CDEF);
        }

        others.push(keeper);
        release_all(&mut pool, others);
    }
}
