//! Promotion and partitioning of overflowing M-tree nodes.

use itertools::Itertools;
use pagetree::descriptor::Descriptor;
use pagetree::errors::{PageTreeError, PageTreeResult};
use pagetree::tree::{Partition, SplitBounds};
use serde::{Deserialize, Serialize};

use crate::metric::Metric;
use crate::sphere::Sphere;

/// How the two reference entries of a split are chosen.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PromotionStrategy {
    /// The entries nearest to and farthest from the node centre, read from
    /// the cached distances to the parent. Every entry must carry one.
    #[default]
    DistanceToParent,
    /// The two entries with the largest centre distance; quadratic.
    MaxDistance,
    /// Slim-tree split: cut the minimum spanning tree of the entries into two
    /// components. Falls back to [`DistanceToParent`](Self::DistanceToParent)
    /// with a hyperplane partition when a component violates the capacity.
    MinimumSpanningTree,
}

/// How the remaining entries are distributed between the two references.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitionStrategy {
    /// Every entry goes to the nearer reference, in node order.
    #[default]
    Hyperplane,
    /// The references take turns picking their nearest remaining entry.
    Balanced,
}

/// Positions of the two reference entries.
pub fn promote<M, T, F>(
    items: &[T],
    sphere: F,
    strategy: PromotionStrategy,
) -> PageTreeResult<(usize, usize)>
where
    M: Metric,
    F: Fn(&T) -> &Sphere<M>,
{
    if items.len() < 2 {
        return Err(PageTreeError::invariant(&format!(
            "cannot promote two references out of {} entries",
            items.len()
        )));
    }
    match strategy {
        PromotionStrategy::DistanceToParent | PromotionStrategy::MinimumSpanningTree => {
            let mut distances = Vec::with_capacity(items.len());
            for (idx, item) in items.iter().enumerate() {
                let distance = sphere(item).distance_to_parent().ok_or_else(|| {
                    PageTreeError::invariant(&format!(
                        "entry {} of an overflowing node has no distance to its parent",
                        idx
                    ))
                })?;
                distances.push(distance);
            }
            // min_by keeps the first minimum, max_by the last maximum
            let nearest = distances
                .iter()
                .enumerate()
                .min_by(|a, b| a.1.total_cmp(b.1))
                .map(|(idx, _)| idx)
                .unwrap_or(0);
            let farthest = distances
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(idx, _)| idx)
                .unwrap_or(items.len() - 1);
            Ok((nearest, farthest))
        }
        PromotionStrategy::MaxDistance => {
            let mut best = (0, 1);
            let mut best_distance = f64::NEG_INFINITY;
            for (i, j) in (0..items.len()).tuple_combinations() {
                let distance = sphere(&items[i]).center_distance(sphere(&items[j]));
                if distance > best_distance {
                    best_distance = distance;
                    best = (i, j);
                }
            }
            Ok(best)
        }
    }
}

/// Distributes `items` around the references at `seeds`. The first
/// reference and its share form the first partition.
pub fn partition<M, T, F>(
    items: Vec<T>,
    seeds: (usize, usize),
    sphere: F,
    strategy: PartitionStrategy,
    bounds: SplitBounds,
) -> Partition<T>
where
    M: Metric,
    F: Fn(&T) -> &Sphere<M>,
{
    let total = items.len();
    let first_cap = bounds.max;
    let second_cap = total - bounds.min;

    let mut first = Vec::with_capacity(first_cap);
    let mut second = Vec::with_capacity(second_cap);
    let mut rest = Vec::with_capacity(total);
    let mut references: (Option<Sphere<M>>, Option<Sphere<M>>) = (None, None);
    for (idx, item) in items.into_iter().enumerate() {
        if idx == seeds.0 {
            references.0 = Some(sphere(&item).clone());
            first.push(item);
        } else if idx == seeds.1 {
            references.1 = Some(sphere(&item).clone());
            second.push(item);
        } else {
            rest.push(item);
        }
    }
    let (a, b) = match references {
        (Some(a), Some(b)) => (a, b),
        // degenerate seeds: fall back to an order-preserving cut
        _ => {
            let mut all = first;
            all.append(&mut second);
            all.append(&mut rest);
            let tail = all.split_off(bounds.max.min(all.len()));
            return (all, tail);
        }
    };

    match strategy {
        PartitionStrategy::Hyperplane => {
            for item in rest {
                let s = sphere(&item);
                let to_first = if first.len() >= first_cap {
                    false
                } else if second.len() >= second_cap {
                    true
                } else {
                    a.center_distance(s) < b.center_distance(s)
                };
                if to_first {
                    first.push(item);
                } else {
                    second.push(item);
                }
            }
        }
        PartitionStrategy::Balanced => {
            let mut rest: Vec<Option<T>> = rest.into_iter().map(Some).collect();
            let mut left = rest.len();
            let mut turn_first = true;
            while left > 0 {
                let take_first = if first.len() >= first_cap {
                    false
                } else if second.len() >= second_cap {
                    true
                } else {
                    turn_first
                };
                let reference = if take_first { &a } else { &b };
                let nearest = rest
                    .iter()
                    .enumerate()
                    .filter_map(|(idx, item)| {
                        item.as_ref()
                            .map(|item| (idx, reference.center_distance(sphere(item))))
                    })
                    .min_by(|x, y| x.1.total_cmp(&y.1))
                    .map(|(idx, _)| idx);
                let item = match nearest.and_then(|idx| rest[idx].take()) {
                    Some(item) => item,
                    None => break,
                };
                if take_first {
                    first.push(item);
                } else {
                    second.push(item);
                }
                left -= 1;
                turn_first = !turn_first;
            }
        }
    }
    (first, second)
}

/// Smallest sphere centred on one of the members that covers all of them.
///
/// The centre is the member whose farthest reach to the others is least;
/// the first such member wins ties.
pub fn enclosing_sphere<'a, M, I>(members: I) -> Option<Sphere<M>>
where
    M: Metric,
    I: IntoIterator<Item = &'a Sphere<M>>,
{
    let members: Vec<&Sphere<M>> = members.into_iter().collect();
    let mut best: Option<(usize, f64)> = None;
    for (idx, candidate) in members.iter().enumerate() {
        let reach = members
            .iter()
            .map(|m| m.reach_from(candidate.center()))
            .fold(0.0, f64::max);
        match best {
            Some((_, least)) if least <= reach => {}
            _ => best = Some((idx, reach)),
        }
    }
    let (idx, _) = best?;
    let mut result = Sphere::point(members[idx].center().to_vec());
    for member in &members {
        result.union(member);
    }
    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::Euclidean;
    use pagetree::errors::ErrorKind;

    type Ball = Sphere<Euclidean>;

    fn points(coords: &[(f64, f64)]) -> Vec<Ball> {
        coords.iter().map(|(x, y)| Ball::point(vec![*x, *y])).collect()
    }

    fn with_parent(mut balls: Vec<Ball>, center: &[f64]) -> Vec<Ball> {
        for ball in &mut balls {
            let d = ball.distance_to(center);
            ball.set_distance_to_parent(Some(d));
        }
        balls
    }

    #[test]
    fn test_promotion_by_parent_distance() {
        let balls = with_parent(points(&[(1.0, 0.0), (5.0, 0.0), (0.5, 0.0), (3.0, 0.0)]), &[0.0, 0.0]);
        let seeds = promote(&balls, |b| b, PromotionStrategy::DistanceToParent).unwrap();
        assert_eq!(seeds, (2, 1));
    }

    #[test]
    fn test_promotion_requires_parent_distances() {
        let mut balls = with_parent(points(&[(1.0, 0.0), (5.0, 0.0), (3.0, 0.0)]), &[0.0, 0.0]);
        balls[1].set_distance_to_parent(None);
        let err = promote(&balls, |b| b, PromotionStrategy::DistanceToParent).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvariantViolation);
    }

    #[test]
    fn test_promotion_by_max_distance() {
        let balls = points(&[(0.0, 0.0), (1.0, 1.0), (-4.0, 0.0), (6.0, 0.0)]);
        assert_eq!(promote(&balls, |b| b, PromotionStrategy::MaxDistance).unwrap(), (2, 3));
    }

    #[test]
    fn test_hyperplane_members_are_nearer_their_reference() {
        let balls = points(&[
            (0.0, 0.0),
            (10.0, 0.0),
            (1.0, 1.0),
            (9.0, 2.0),
            (2.0, -1.0),
            (8.0, 0.5),
        ]);
        let bounds = SplitBounds { min: 2, max: 4 };
        let (first, second) =
            partition(balls, (0, 1), |b| b, PartitionStrategy::Hyperplane, bounds);
        assert_eq!(first[0].center(), &[0.0, 0.0]);
        assert_eq!(second[0].center(), &[10.0, 0.0]);
        for member in &first {
            assert!(member.center_distance(&first[0]) <= member.center_distance(&second[0]));
        }
        for member in &second {
            assert!(member.center_distance(&second[0]) <= member.center_distance(&first[0]));
        }
        assert_eq!((first.len(), second.len()), (3, 3));
    }

    #[test]
    fn test_hyperplane_tie_goes_to_second() {
        let balls = points(&[(0.0, 0.0), (2.0, 0.0), (1.0, 0.0), (1.0, 5.0)]);
        let bounds = SplitBounds { min: 1, max: 3 };
        let (first, second) =
            partition(balls, (0, 1), |b| b, PartitionStrategy::Hyperplane, bounds);
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 3);
    }

    #[test]
    fn test_hyperplane_full_partition_forces_the_rest() {
        // everything is near the first reference
        let balls = points(&[(0.0, 0.0), (100.0, 0.0), (1.0, 0.0), (2.0, 0.0), (3.0, 0.0), (4.0, 0.0)]);
        let bounds = SplitBounds { min: 2, max: 3 };
        let (first, second) =
            partition(balls, (0, 1), |b| b, PartitionStrategy::Hyperplane, bounds);
        assert_eq!(first.len(), 3);
        assert_eq!(second.len(), 3);
        assert_eq!(second[1].center(), &[3.0, 0.0]);
    }

    #[test]
    fn test_balanced_partition_alternates() {
        let balls = points(&[(0.0, 0.0), (100.0, 0.0), (1.0, 0.0), (2.0, 0.0), (3.0, 0.0), (4.0, 0.0), (5.0, 0.0)]);
        let bounds = SplitBounds { min: 3, max: 4 };
        let (first, second) = partition(balls, (0, 1), |b| b, PartitionStrategy::Balanced, bounds);
        // references pick alternately: first takes 1, second takes 5, first 2, second 4, first 3
        let xs = |v: &Vec<Ball>| v.iter().map(|b| b.center()[0]).collect::<Vec<_>>();
        assert_eq!(xs(&first), vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(xs(&second), vec![100.0, 5.0, 4.0]);
    }

    #[test]
    fn test_enclosing_sphere_picks_central_member() {
        let mut balls = points(&[(0.0, 0.0), (4.0, 0.0), (2.0, 0.0), (2.0, 1.0)]);
        balls.push(Ball::new(vec![3.0, 0.0], 0.5).unwrap());
        let sphere = enclosing_sphere(&balls).unwrap();
        assert_eq!(sphere.center(), &[2.0, 0.0]);
        assert_eq!(sphere.radius(), 2.0);
        assert!(balls.iter().all(|b| sphere.contains(b)));
        assert!(enclosing_sphere(&Vec::<Ball>::new()).is_none());
    }
}
