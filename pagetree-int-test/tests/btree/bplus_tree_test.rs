use pagetree::btree::{BPlusOps, BPlusTree, SortOrder};
use pagetree::container::{BlockFileContainer, Container};
use pagetree::errors::PageTreeResult;
use pagetree::tree::{Capacity, NodeOf};
use pagetree_int_test::test_util::{cleanup, create_test_context, run_test, shuffled_keys};

type FileBPlusTree = BPlusTree<u32, u32, BlockFileContainer<NodeOf<BPlusOps<u32, u32>>>>;

fn keys_of(tree: &FileBPlusTree) -> PageTreeResult<Vec<u32>> {
    tree.iter().map(|entry| entry.map(|(key, _)| key)).collect()
}

#[test]
fn test_shuffled_inserts_iterate_in_order() {
    run_test(
        || create_test_context(),
        |ctx| {
            let capacity = Capacity::new(2, 4)?;
            let tree = FileBPlusTree::new(ctx.create_container("keys.db")?, capacity);
            for key in shuffled_keys(1..=1000, 42) {
                tree.insert(key, key * 10)?;
            }

            assert_eq!(tree.len(), 1000);
            assert_eq!(keys_of(&tree)?, (1..=1000).collect::<Vec<_>>());

            // capacity of every non-root node is verified by the check
            let report = tree.check()?;
            assert_eq!(report.entries, 1000);
            assert!(report.height >= 5);
            assert_eq!(report.nodes_per_level.last(), Some(&1));
            let below_root = report.nodes_per_level[report.height as usize - 2];
            assert!((2..=4).contains(&below_root));

            assert_eq!(tree.get(&500)?, Some(5000));
            assert_eq!(tree.first()?, Some((1, 10)));
            assert_eq!(tree.last()?, Some((1000, 10000)));
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
            let capacity = Capacity::new(2, 4)?;
            {
                let tree = FileBPlusTree::new(ctx.create_container("removals.db")?, capacity);
                for key in shuffled_keys(1..=1000, 7) {
                    tree.insert(key, key)?;
                }
                for key in shuffled_keys(1..=1000, 8).into_iter().filter(|k| k % 2 == 1) {
                    assert_eq!(tree.remove(&key)?, Some(key));
                }
                assert_eq!(tree.remove(&1)?, None);
                tree.check()?;
                tree.flush()?;
            }

            let tree = FileBPlusTree::open(ctx.open_container("removals.db")?, capacity)?;
            assert_eq!(tree.len(), 500);
            assert_eq!(tree.check()?.entries, 500);
            let range: Vec<u32> = tree
                .range(100..110)
                .map(|entry| entry.map(|(key, _)| key))
                .collect::<PageTreeResult<_>>()?;
            assert_eq!(range, vec![100, 102, 104, 106, 108]);

            for key in 1..=1000u32 {
                tree.insert(key, key)?;
            }
            assert_eq!(tree.get_all(&10)?, vec![10, 10]);
            assert_eq!(tree.check()?.entries, 1500);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_bulk_load_then_drain() {
    run_test(
        || create_test_context(),
        |ctx| {
            let capacity = Capacity::new(4, 16)?;
            let tree = FileBPlusTree::new(ctx.create_container("bulk.db")?, capacity);
            let entries: Vec<(u32, u32)> = (0..5000u32).rev().map(|k| (k, k + 1)).collect();
            tree.bulk_load(entries, SortOrder::Descending)?;
            assert_eq!(tree.check()?.entries, 5000);
            assert_eq!(keys_of(&tree)?, (0..5000).collect::<Vec<_>>());

            for key in shuffled_keys(0..=4999, 99) {
                assert_eq!(tree.remove(&key)?, Some(key + 1));
            }
            assert!(tree.is_empty());
            assert_eq!(tree.height(), 0);
            tree.check()?;
            assert_eq!(tree.container().fixed_count(), 0);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}
