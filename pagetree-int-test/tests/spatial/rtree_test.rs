//! R-tree integration tests on block files, one run per split strategy.

use pagetree::container::BlockFileContainer;
use pagetree::descriptor::Descriptor;
use pagetree::tree::Capacity;
use pagetree_int_test::test_util::{cleanup, create_test_context, random_rects, run_test};
use pagetree_spatial::rtree::RTreeNode;
use pagetree_spatial::{RTree, RTreeConfig, Rectangle, SpatialResult, SplitStrategy};
use std::collections::HashSet;

type FileRTree = RTree<u64, BlockFileContainer<RTreeNode<u64>>>;

const STRATEGIES: [SplitStrategy; 4] = [
    SplitStrategy::RStar,
    SplitStrategy::Quadratic,
    SplitStrategy::Linear,
    SplitStrategy::Greene,
];

fn universe() -> Rectangle {
    Rectangle::new_2d(0.0, 0.0, 1000.0, 1000.0)
}

fn ids(found: impl Iterator<Item = SpatialResult<(Rectangle, u64)>>) -> SpatialResult<Vec<u64>> {
    let mut ids = found.map(|entry| entry.map(|(_, id)| id)).collect::<SpatialResult<Vec<_>>>()?;
    ids.sort_unstable();
    Ok(ids)
}

#[test]
fn test_whole_universe_query_returns_every_entry_once() {
    run_test(
        || create_test_context(),
        |ctx| {
            for split in STRATEGIES {
                let name = format!("{:?}.db", split);
                let config = RTreeConfig::new(Capacity::new(4, 12)?).with_split(split);
                let tree = FileRTree::new(ctx.create_container(&name)?, config);
                for (rect, id) in random_rects(17, 200) {
                    tree.insert(rect, id)?;
                }

                let found = ids(tree.query(&universe()))?;
                let distinct: HashSet<u64> = found.iter().copied().collect();
                assert_eq!(found.len(), 200, "{:?}", split);
                assert_eq!(distinct.len(), 200, "{:?}", split);

                let report = tree.check()?;
                assert!(report.height >= 3, "{:?}", split);
                let leaves = tree.query_level(&universe(), 1).count();
                assert_eq!(leaves, report.nodes_per_level[0], "{:?}", split);
            }
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_window_and_nearest_queries_match_brute_force() {
    run_test(
        || create_test_context(),
        |ctx| {
            let entries = random_rects(23, 1000);
            let config = RTreeConfig::new(Capacity::new(4, 12)?);
            let tree = FileRTree::new(ctx.create_container("queries.db")?, config);
            for (rect, id) in &entries {
                tree.insert(rect.clone(), *id)?;
            }

            for window in [
                Rectangle::new_2d(100.0, 100.0, 200.0, 300.0),
                Rectangle::new_2d(0.0, 0.0, 50.0, 50.0),
                Rectangle::new_2d(500.0, 0.0, 510.0, 1000.0),
            ] {
                let mut expected: Vec<u64> = entries
                    .iter()
                    .filter(|(rect, _)| rect.overlaps(&window))
                    .map(|(_, id)| *id)
                    .collect();
                expected.sort_unstable();
                assert_eq!(ids(tree.query(&window))?, expected);

                let mut inside: Vec<u64> = entries
                    .iter()
                    .filter(|(rect, _)| window.contains(rect))
                    .map(|(_, id)| *id)
                    .collect();
                inside.sort_unstable();
                assert_eq!(ids(tree.contained_in(&window))?, inside);
            }

            let point = [333.0, 666.0];
            let mut distances: Vec<f64> = entries.iter().map(|(rect, _)| rect.min_dist(&point)).collect();
            distances.sort_by(|a, b| a.total_cmp(b));
            let knn = tree.knn(&point, 10)?;
            assert_eq!(knn.len(), 10);
            for ((rect, _, distance), expected) in knn.iter().zip(&distances) {
                assert_eq!(rect.min_dist(&point), *distance);
                assert_eq!(*distance, *expected);
            }
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_removals_survive_reopen() {
    run_test(
        || create_test_context(),
        |ctx| {
            let entries = random_rects(31, 600);
            let config = RTreeConfig::new(Capacity::new(4, 12)?);
            {
                let tree = FileRTree::new(ctx.create_container("removals.db")?, config);
                for (rect, id) in &entries {
                    tree.insert(rect.clone(), *id)?;
                }
                for (rect, id) in entries.iter().filter(|(_, id)| id % 3 == 0) {
                    assert!(tree.remove(rect, id)?);
                }
                assert!(!tree.remove(&entries[0].0, &0)?);
                tree.check()?;
                tree.flush()?;
            }

            let tree = FileRTree::open(ctx.open_container("removals.db")?, config)?;
            assert_eq!(tree.len(), 400);
            assert_eq!(tree.check()?.entries, 400);
            let expected: Vec<u64> = (0..600).filter(|id| id % 3 != 0).collect();
            assert_eq!(ids(tree.query(&universe()))?, expected);

            for (rect, id) in entries.iter().filter(|(_, id)| id % 3 != 0) {
                assert!(tree.remove(rect, id)?);
            }
            assert!(tree.is_empty());
            assert_eq!(tree.bounds(), None);
            tree.check()?;
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}
