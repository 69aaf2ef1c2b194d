//! Micro-benchmarks for core `Cbs` operations.
//!
//! Uses Criterion for statistically rigorous measurement with regression
//! detection and HTML reports.
//!
//! # Running
//!
//! ```bash
//! cargo bench --bench micro              # run all micro-benchmarks
//! cargo bench --bench micro -- insert    # filter by name
//! ```
//!
//! Reports are generated in `target/criterion/report/index.html`.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use cbs::{Cbs, CbsConfig};

const ALIGNMENT: usize = size_of::<usize>();

fn fast_find_config() -> CbsConfig {
    CbsConfig {
        min_size: 0,
        alignment: ALIGNMENT,
        may_use_inline: false,
        fast_find: true,
        node_pool_capacity: None,
    }
}

/// Fills a fresh `Cbs` with `n` same-sized, evenly spaced, mutually
/// disjoint (non-adjacent — a one-unit gap separates each pair) ranges,
/// so the tree has `n` live nodes with no further coalescing possible.
fn populate_disjoint(cbs: &mut Cbs<()>, n: u64, block_size: usize) {
    let stride = block_size + ALIGNMENT;
    for i in 0..n {
        let base = i as usize * stride;
        unsafe {
            cbs.insert(base, base + block_size).unwrap();
        }
    }
}

// ================================================================================================
// Insert benchmarks
// ================================================================================================

/// Benchmark group for `insert`.
///
/// # Sub-benchmarks
///
/// ## `sequential_disjoint`
///
/// **Scenario:** Inserts same-sized ranges back to back, each separated
/// from the last by a one-alignment-unit gap, so no coalescing ever
/// happens and the tree keeps growing by one node per insert.
///
/// **What it measures:** Splay-tree insert cost as the tree grows —
/// dominated by the `O(log n)` search-then-splay walk.
///
/// ## `sequential_coalescing`
///
/// **Scenario:** Inserts adjacent ranges back to back, so every insert
/// after the first merges with its left neighbour and the tree never
/// grows past one node.
///
/// **What it measures:** The coalescing fast path — a neighbour lookup
/// and an in-place range update, no new node allocation.
fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert");

    group.bench_function("sequential_disjoint", |b| {
        let mut cbs = Cbs::new(fast_find_config(), ());
        let mut seq = 0usize;
        b.iter(|| {
            let base = seq * (64 + ALIGNMENT);
            unsafe {
                cbs.insert(black_box(base), black_box(base + 64)).unwrap();
            }
            seq += 1;
        });
    });

    group.bench_function("sequential_coalescing", |b| {
        let mut cbs = Cbs::new(fast_find_config(), ());
        let mut base = 0usize;
        b.iter(|| {
            unsafe {
                cbs.insert(black_box(base), black_box(base + 64)).unwrap();
            }
            base += 64;
        });
    });

    group.finish();
}

// ================================================================================================
// Delete benchmarks
// ================================================================================================

/// Benchmark group for `delete`.
///
/// # Sub-benchmarks
///
/// ## `interior_split/{100,1000,10000}_nodes`
///
/// **Scenario:** Against a tree pre-populated with N disjoint blocks,
/// repeatedly deletes a small range from the interior of one of them
/// (forcing the shrink-and-new-residual path), cycling through blocks.
///
/// **What it measures:** Search-then-splay cost at various tree sizes,
/// plus one extra node insertion for the residual.
fn bench_delete(c: &mut Criterion) {
    let mut group = c.benchmark_group("delete");

    for &n in &[100u64, 1_000, 10_000] {
        group.bench_function(BenchmarkId::new("interior_split", format!("{n}_nodes")), |b| {
            b.iter_batched(
                || {
                    let mut cbs = Cbs::new(fast_find_config(), ());
                    populate_disjoint(&mut cbs, n, 256);
                    cbs
                },
                |mut cbs| {
                    let stride = 256 + ALIGNMENT;
                    for i in 0..n as usize {
                        let base = i * stride;
                        cbs.delete(black_box(base + 64), black_box(base + 128)).unwrap();
                    }
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

// ================================================================================================
// Find benchmarks
// ================================================================================================

/// Benchmark group for `find_first` / `find_last`.
///
/// # Sub-benchmarks
///
/// ## `find_first/{100,1000,10000}_nodes` and `find_last/...`
///
/// **Scenario:** Against a tree of N disjoint, same-sized blocks, finds
/// a block of exactly that size repeatedly.
///
/// **What it measures:** The `maxSize`-augmented `O(log n)` search —
/// throughput should degrade only logarithmically as `n` grows, unlike
/// a linear scan.
fn bench_find(c: &mut Criterion) {
    let mut group = c.benchmark_group("find");

    for &n in &[100u64, 1_000, 10_000] {
        group.throughput(Throughput::Elements(1));

        let mut cbs = Cbs::new(fast_find_config(), ());
        populate_disjoint(&mut cbs, n, 256);

        group.bench_function(BenchmarkId::new("find_first", format!("{n}_nodes")), |b| {
            b.iter(|| {
                black_box(cbs.find_first(black_box(256)));
            });
        });

        group.bench_function(BenchmarkId::new("find_last", format!("{n}_nodes")), |b| {
            b.iter(|| {
                black_box(cbs.find_last(black_box(256)));
            });
        });
    }

    group.finish();
}

// ================================================================================================
// Emergency fallback benchmark
// ================================================================================================

/// Benchmark group for the emergency-list fallback path.
///
/// # Sub-benchmarks
///
/// ## `add_then_remove`
///
/// **Scenario:** Against a `Cbs` whose node pool is permanently
/// exhausted (`node_pool_capacity: Some(0)`), repeatedly inserts then
/// immediately deletes the same range — every insert falls back to the
/// (doomed-to-fail-flush) emergency block list, every delete finds it
/// there and removes it, leaving the list empty again each iteration.
///
/// **What it measures:** The raw-pointer overlay path's round-trip
/// cost — list insertion by address order, a failed flush attempt, and
/// list removal — against the ordinary tree insert/delete cost measured
/// by `insert/*` and `delete/*` above.
fn bench_emergency(c: &mut Criterion) {
    let mut group = c.benchmark_group("emergency");

    group.bench_function("add_then_remove", |b| {
        // Backed by real memory: emergency fallback writes bookkeeping
        // headers directly into the range it's tracking.
        let arena = vec![0usize; 16];
        let base = arena.as_ptr() as usize;
        let config = CbsConfig {
            min_size: 0,
            alignment: ALIGNMENT,
            may_use_inline: true,
            fast_find: false,
            node_pool_capacity: Some(0),
        };
        let mut cbs = Cbs::new(config, ());

        b.iter(|| {
            unsafe {
                cbs.insert(black_box(base), black_box(base + 64)).unwrap();
            }
            cbs.delete(black_box(base), black_box(base + 64)).unwrap();
        });
    });

    group.finish();
}

criterion_group!(benches, bench_insert, bench_delete, bench_find, bench_emergency);
criterion_main!(benches);
