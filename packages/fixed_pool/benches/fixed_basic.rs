//! Basic benchmarks for the `fixed_pool` crate.
#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::hint::black_box;
use std::iter;
use std::num::NonZero;
use std::time::Instant;

use alloc_tracker::Allocator;
use criterion::{Criterion, criterion_group, criterion_main};
use fixed_pool::{SlotPool, TypedPool};
use new_zealand::nz;

criterion_group!(benches, entrypoint);
criterion_main!(benches);

#[global_allocator]
static ALLOCATOR: Allocator<std::alloc::System> = Allocator::system();

type TestItem = u64;
const TEST_VALUE: TestItem = 1024;

const POOL_SIZE: NonZero<usize> = nz!(10_000);

fn entrypoint(c: &mut Criterion) {
    let allocs = alloc_tracker::Session::new();

    let mut group = c.benchmark_group("fixed_basic");

    let allocs_op = allocs.operation("build_64");
    group.bench_function("build_64", |b| {
        b.iter_custom(|iters| {
            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                drop(black_box(TypedPool::<TestItem>::new(black_box(nz!(64)))));
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("allocate_first");
    group.bench_function("allocate_first", |b| {
        b.iter_custom(|iters| {
            let mut pools = iter::repeat_with(|| SlotPool::new(nz!(8), nz!(64)))
                .take(usize::try_from(iters).unwrap())
                .collect::<Vec<_>>();
            let mut slots = Vec::with_capacity(pools.len());

            let span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for pool in &mut pools {
                slots.push(black_box(pool.allocate().unwrap()));
            }

            let elapsed = start.elapsed();

            drop(span);

            for (pool, slot) in pools.iter_mut().zip(slots) {
                // SAFETY: The slot came from this pool and is not used afterwards.
                unsafe { pool.deallocate(slot) };
            }

            elapsed
        });
    });

    let allocs_op = allocs.operation("allocate_deallocate");
    group.bench_function("allocate_deallocate", |b| {
        b.iter_custom(|iters| {
            let mut pool = SlotPool::new(nz!(8), nz!(64));

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                let slot = black_box(pool.allocate().unwrap());

                // SAFETY: The slot came from this pool and is not used afterwards.
                unsafe { pool.deallocate(slot) };
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("new_delete_object");
    group.bench_function("new_delete_object", |b| {
        b.iter_custom(|iters| {
            let mut pool = TypedPool::<TestItem>::new(nz!(64));

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                let object = pool.new_object(black_box(TEST_VALUE)).unwrap();

                // SAFETY: The object came from this pool and is not used afterwards.
                unsafe { pool.delete_object(black_box(object)) };
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("stats");
    group.bench_function("stats", |b| {
        b.iter_custom(|iters| {
            let pool = SlotPool::new(nz!(8), nz!(64));

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                _ = black_box(pool.stats());
            }

            start.elapsed()
        });
    });

    group.finish();

    let mut group = c.benchmark_group("fixed_slow");

    let allocs_op = allocs.operation("fill_10k");
    group.bench_function("fill_10k", |b| {
        b.iter_custom(|iters| {
            let mut pool = TypedPool::<TestItem>::new(POOL_SIZE);
            let mut objects = Vec::with_capacity(POOL_SIZE.get());

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                for _ in 0..POOL_SIZE.get() {
                    objects.push(pool.new_object(black_box(TEST_VALUE)).unwrap());
                }

                #[expect(clippy::iter_with_drain, reason = "to reuse the allocation")]
                for object in objects.drain(..) {
                    // SAFETY: The object came from this pool and is not used afterwards.
                    unsafe { pool.delete_object(object) };
                }
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("forward_10_back_5_times_1000");
    group.bench_function("forward_10_back_5_times_1000", |b| {
        // We add 10 items, remove the first 5 and repeat this 1000 times.
        // This interleaves fresh slots with recycled ones.
        b.iter_custom(|iters| {
            let mut pool = TypedPool::<TestItem>::new(POOL_SIZE);
            let mut to_remove = Vec::with_capacity(5);
            let mut to_keep = Vec::with_capacity(5000);

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                for _ in 0..1000 {
                    to_remove.clear();

                    for _ in 0..5 {
                        to_remove.push(pool.new_object(black_box(TEST_VALUE)).unwrap());
                    }

                    for _ in 0..5 {
                        to_keep.push(pool.new_object(black_box(TEST_VALUE)).unwrap());
                    }

                    #[expect(clippy::iter_with_drain, reason = "to reuse the allocation")]
                    for object in to_remove.drain(..) {
                        // SAFETY: The object came from this pool and is not used afterwards.
                        unsafe { pool.delete_object(object) };
                    }
                }

                #[expect(clippy::iter_with_drain, reason = "to reuse the allocation")]
                for object in to_keep.drain(..) {
                    // SAFETY: The object came from this pool and is not used afterwards.
                    unsafe { pool.delete_object(object) };
                }
            }

            start.elapsed()
        });
    });

    group.finish();

    allocs.print_to_stdout();
}
