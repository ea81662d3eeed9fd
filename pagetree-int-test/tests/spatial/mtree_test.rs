use pagetree::container::BlockFileContainer;
use pagetree::tree::Capacity;
use pagetree_int_test::test_util::{cleanup, create_test_context, random_points, run_test};
use pagetree_spatial::mtree::MTreeNode;
use pagetree_spatial::{
    Euclidean, MTree, MTreeConfig, Manhattan, Metric, PartitionStrategy, PromotionStrategy,
    SpatialResult, SpatialValue,
};

type FileMTree<M> = MTree<u64, M, BlockFileContainer<MTreeNode<M, u64>>>;

fn configs() -> SpatialResult<Vec<(&'static str, MTreeConfig)>> {
    let capacity = Capacity::new(4, 12)?;
    Ok(vec![
        ("parent", MTreeConfig::new(capacity)),
        (
            "balanced",
            MTreeConfig::new(capacity)
                .with_promotion(PromotionStrategy::MaxDistance)
                .with_partition(PartitionStrategy::Balanced),
        ),
        ("slim", MTreeConfig::slim(capacity)),
    ])
}

fn range_ids<M, T>(
    tree: &MTree<T, M, BlockFileContainer<MTreeNode<M, T>>>,
    center: &[f64],
    radius: f64,
) -> SpatialResult<Vec<T>>
where
    M: Metric,
    T: SpatialValue + Ord,
{
    let mut ids = tree
        .range(center, radius)?
        .map(|entry| entry.map(|(_, id)| id))
        .collect::<SpatialResult<Vec<_>>>()?;
    ids.sort_unstable();
    Ok(ids)
}

fn brute_range<M: Metric>(points: &[Vec<f64>], center: &[f64], radius: f64) -> Vec<u64> {
    (0..points.len() as u64)
        .filter(|&id| M::distance(&points[id as usize], center) <= radius)
        .collect()
}

#[test]
fn test_range_queries_match_brute_force() {
    run_test(
        || create_test_context(),
        |ctx| {
            let points = random_points(3, 1000);
            for (name, config) in configs()? {
                let tree: FileMTree<Euclidean> =
                    MTree::new(ctx.create_container(&format!("{}.db", name))?, config);
                for (id, point) in points.iter().enumerate() {
                    tree.insert(point.clone(), id as u64)?;
                }
                let report = tree.check()?;
                assert!(report.height >= 3, "{}", name);

                for (center, radius) in [([500.0, 500.0], 80.0), ([10.0, 990.0], 150.0), ([250.0, 700.0], 0.0)] {
                    assert_eq!(
                        range_ids(&tree, &center, radius)?,
                        brute_range::<Euclidean>(&points, &center, radius),
                        "{} around {:?}",
                        name,
                        center
                    );
                }
            }
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_slim_tree_under_manhattan_survives_reopen() {
    run_test(
        || create_test_context(),
        |ctx| {
            let points = random_points(8, 700);
            let config = MTreeConfig::slim(Capacity::new(4, 12)?);
            {
                let tree: FileMTree<Manhattan> = MTree::new(ctx.create_container("slim.db")?, config);
                for (id, point) in points.iter().enumerate() {
                    tree.insert(point.clone(), id as u64)?;
                }
                for (id, point) in points.iter().enumerate().filter(|(id, _)| id % 4 == 0) {
                    assert!(tree.remove(point, &(id as u64))?);
                }
                tree.check()?;
                tree.flush()?;
            }

            let tree: FileMTree<Manhattan> = MTree::open(ctx.open_container("slim.db")?, config)?;
            assert_eq!(tree.len(), 525);
            tree.check()?;

            let center = [400.0, 400.0];
            let expected: Vec<u64> = brute_range::<Manhattan>(&points, &center, 120.0)
                .into_iter()
                .filter(|id| id % 4 != 0)
                .collect();
            assert_eq!(range_ids(&tree, &center, 120.0)?, expected);

            let mut distances: Vec<f64> = points
                .iter()
                .enumerate()
                .filter(|(id, _)| id % 4 != 0)
                .map(|(_, point)| Manhattan::distance(point, &center))
                .collect();
            distances.sort_by(|a, b| a.total_cmp(b));
            let knn: Vec<f64> = tree.knn(&center, 20)?.into_iter().map(|(_, _, d)| d).collect();
            assert_eq!(knn, distances[..20].to_vec());
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_every_point_is_found_and_removed_under_manhattan() {
    run_test(
        || create_test_context(),
        |ctx| {
            let points = random_points(8, 700);
            let tree: FileMTree<Manhattan> = MTree::new(
                ctx.create_container("boundary.db")?,
                MTreeConfig::slim(Capacity::new(4, 12)?),
            );
            for (id, point) in points.iter().enumerate() {
                tree.insert(point.clone(), id as u64)?;
            }
            for (id, point) in points.iter().enumerate() {
                assert!(range_ids(&tree, point, 0.0)?.contains(&(id as u64)), "point {}", id);
            }
            for (id, point) in points.iter().enumerate() {
                assert!(tree.remove(point, &(id as u64))?, "point {}", id);
            }
            assert_eq!(tree.len(), 0);
            tree.check()?;
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}
