//! B+-tree benchmarks

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use pagetree::btree::{BPlusOps, BPlusTree, SortOrder};
use pagetree::container::{BlockFileConfig, BlockFileContainer, MemoryContainer};
use pagetree::tree::{Capacity, NodeOf};
use std::hint::black_box;
use tempfile::tempdir;

type FileTree = BPlusTree<u64, u64, BlockFileContainer<NodeOf<BPlusOps<u64, u64>>>>;

fn bench_memory_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("BPlusTree Insert (memory)");

    for size in [100u64, 1000, 10000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                let tree = BPlusTree::new(MemoryContainer::new(), Capacity::new(16, 64).unwrap());
                for i in 0..size {
                    // scattered keys
                    let key = i.wrapping_mul(2654435761) % 1_000_003;
                    tree.insert(key, i).unwrap();
                }
                black_box(tree.len())
            });
        });
    }

    group.finish();
}

fn bench_file_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("BPlusTree Insert (block file)");

    for size in [1000u64, 10000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter_with_setup(
                || {
                    let dir = tempdir().unwrap();
                    let path = dir.path().join("bench.bpt");
                    let container =
                        BlockFileContainer::create(&path, BlockFileConfig::default()).unwrap();
                    let capacity = FileTree::capacity_for(4096, &(0, 0), 0.4).unwrap();
                    (FileTree::new(container, capacity), dir)
                },
                |(tree, _dir)| {
                    for i in 0..size {
                        tree.insert(i.wrapping_mul(2654435761) % 1_000_003, i).unwrap();
                    }
                    tree.flush().unwrap();
                    black_box(tree.len())
                },
            );
        });
    }

    group.finish();
}

fn bench_range_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("BPlusTree Range");

    let tree = BPlusTree::new(MemoryContainer::new(), Capacity::new(16, 64).unwrap());
    tree.bulk_load((0..100_000u64).map(|k| (k, k)).collect(), SortOrder::Ascending)
        .unwrap();

    group.bench_function("range_1k_of_100k", |b| {
        b.iter(|| black_box(tree.range(40_000..41_000).count()));
    });
    group.bench_function("point_get_100k", |b| {
        b.iter(|| black_box(tree.get(&77_777).unwrap()));
    });

    group.finish();
}

criterion_group!(benches, bench_memory_insert, bench_file_insert, bench_range_scan);
criterion_main!(benches);
