use pagetree::container::BlockFileContainer;
use pagetree::descriptor::Descriptor;
use pagetree::errors::PageTreeResult;
use pagetree::tree::{All, Capacity};
use pagetree_int_test::test_util::{cleanup, create_test_context, random_rects, run_test};
use pagetree_spatial::hilbert_rtree::HilbertNode;
use pagetree_spatial::{HilbertRTree, HilbertRTreeConfig, Rectangle, SpatialResult};

type FileHilbert = HilbertRTree<u64, BlockFileContainer<HilbertNode<u64>>>;

fn config() -> HilbertRTreeConfig {
    HilbertRTreeConfig::new(
        Capacity::new(3, 8).unwrap(),
        Rectangle::new_2d(0.0, 0.0, 1000.0, 1000.0),
    )
    .with_order(12)
}

fn assert_hilbert_order(tree: &FileHilbert) -> PageTreeResult<()> {
    let keys: Vec<u64> = tree
        .engine()
        .query(All::new(), 0)
        .entries()
        .map(|entry| entry.map(|(rect, _)| tree.key(&rect)))
        .collect::<PageTreeResult<_>>()?;
    assert!(keys.windows(2).all(|pair| pair[0] <= pair[1]));
    Ok(())
}

#[test]
fn test_bulk_load_reopen_and_grow() {
    run_test(
        || create_test_context(),
        |ctx| {
            let entries = random_rects(5, 1500);
            {
                let tree = FileHilbert::new(ctx.create_container("hilbert.db")?, config())?;
                tree.bulk_load(entries[..1000].to_vec())?;
                assert_eq!(tree.check()?.entries, 1000);
                tree.flush()?;
            }

            let tree = FileHilbert::open(ctx.open_container("hilbert.db")?, config())?;
            assert_eq!(tree.len(), 1000);
            assert_hilbert_order(&tree)?;

            for (rect, id) in &entries[1000..] {
                tree.insert(rect.clone(), *id)?;
            }
            tree.check()?;
            assert_hilbert_order(&tree)?;

            let window = Rectangle::new_2d(250.0, 400.0, 600.0, 520.0);
            let mut expected: Vec<u64> = entries
                .iter()
                .filter(|(rect, _)| rect.overlaps(&window))
                .map(|(_, id)| *id)
                .collect();
            expected.sort_unstable();
            let mut found = tree
                .query(&window)
                .map(|entry| entry.map(|(_, id)| id))
                .collect::<SpatialResult<Vec<_>>>()?;
            found.sort_unstable();
            assert_eq!(found, expected);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_removal_keeps_nearest_neighbours_exact() {
    run_test(
        || create_test_context(),
        |ctx| {
            let entries = random_rects(9, 800);
            let tree = FileHilbert::new(ctx.create_container("knn.db")?, config())?;
            for (rect, id) in &entries {
                tree.insert(rect.clone(), *id)?;
            }
            for (rect, id) in entries.iter().filter(|(_, id)| id % 2 == 0) {
                assert!(tree.remove(rect, id)?);
            }
            tree.check()?;
            assert_eq!(tree.len(), 400);

            let point = [512.0, 128.0];
            let mut expected: Vec<f64> = entries
                .iter()
                .filter(|(_, id)| id % 2 == 1)
                .map(|(rect, _)| rect.min_dist(&point))
                .collect();
            expected.sort_by(|a, b| a.total_cmp(b));
            let found: Vec<f64> = tree.knn(&point, 15)?.into_iter().map(|(_, _, d)| d).collect();
            assert_eq!(found, expected[..15].to_vec());
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}
