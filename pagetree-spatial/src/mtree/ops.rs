use std::marker::PhantomData;

use pagetree::errors::{PageTreeError, PageTreeResult};
use pagetree::tree::{IndexEntry, Node, NodeOps, Partition, QueryFilter, SplitBounds};

use super::slim::mst_split;
use super::split::{enclosing_sphere, partition, promote, PartitionStrategy, PromotionStrategy};
use crate::metric::Metric;
use crate::sphere::{Sphere, DISTANCE_TOLERANCE};
use crate::SpatialValue;

/// Node operations of the M-tree.
///
/// Leaf entries are `(sphere, value)` pairs. Every sphere held by a node,
/// leaf entry or index entry, caches its distance to the centre of that
/// node; [`normalize`](NodeOps::normalize) recomputes the caches whenever a
/// node changes and [`check_node`](NodeOps::check_node) verifies them.
pub struct MTreeOps<M, T> {
    promotion: PromotionStrategy,
    partition: PartitionStrategy,
    _types: PhantomData<fn() -> (M, T)>,
}

impl<M, T> MTreeOps<M, T> {
    pub fn new(promotion: PromotionStrategy, partition: PartitionStrategy) -> Self {
        Self {
            promotion,
            partition,
            _types: PhantomData,
        }
    }
}

impl<M: Metric, T> MTreeOps<M, T> {
    fn split<X, F>(&self, items: Vec<X>, bounds: SplitBounds, sphere: F) -> PageTreeResult<Partition<X>>
    where
        F: Fn(&X) -> &Sphere<M> + Copy,
    {
        let items = match self.promotion {
            PromotionStrategy::MinimumSpanningTree => match mst_split(items, sphere, bounds) {
                Ok(partition) => return Ok(partition),
                Err(items) => {
                    log::debug!("spanning tree split of {} entries falls back to hyperplane", items.len());
                    let seeds = promote(&items, sphere, PromotionStrategy::DistanceToParent)?;
                    return Ok(partition(items, seeds, sphere, PartitionStrategy::Hyperplane, bounds));
                }
            },
            _ => items,
        };
        let seeds = promote(&items, sphere, self.promotion)?;
        Ok(partition(items, seeds, sphere, self.partition, bounds))
    }
}

/// Index of the child that should receive `sphere`.
///
/// Among children already covering it the one with the nearest centre wins;
/// otherwise the child needing the least radius growth, nearer centre first
/// on ties.
pub fn choose_child<M: Metric>(children: &[IndexEntry<Sphere<M>>], sphere: &Sphere<M>) -> usize {
    let mut best = 0;
    let mut best_key = (true, f64::INFINITY, f64::INFINITY);
    for (idx, child) in children.iter().enumerate() {
        let distance = child.descriptor.center_distance(sphere);
        let growth = distance + sphere.radius() - child.descriptor.radius();
        let key = if growth <= 0.0 {
            (false, distance, 0.0)
        } else {
            (true, growth, distance)
        };
        if key.0 < best_key.0
            || (key.0 == best_key.0 && (key.1 < best_key.1 || (key.1 == best_key.1 && key.2 < best_key.2)))
        {
            best = idx;
            best_key = key;
        }
    }
    best
}

fn distance_mismatch(cached: Option<f64>, actual: f64) -> bool {
    match cached {
        Some(cached) => (cached - actual).abs() > DISTANCE_TOLERANCE * actual.max(1.0),
        None => true,
    }
}

impl<M: Metric, T: SpatialValue> NodeOps for MTreeOps<M, T> {
    type Entry = (Sphere<M>, T);
    type Desc = Sphere<M>;

    fn descriptor(&self, entry: &(Sphere<M>, T)) -> Sphere<M> {
        entry.0.clone()
    }

    fn choose_subtree(
        &self,
        children: &[IndexEntry<Sphere<M>>],
        desc: &Sphere<M>,
        _level: u32,
    ) -> usize {
        choose_child(children, desc)
    }

    fn split_leaf(
        &self,
        entries: Vec<(Sphere<M>, T)>,
        bounds: SplitBounds,
    ) -> PageTreeResult<Partition<(Sphere<M>, T)>> {
        self.split(entries, bounds, |e| &e.0)
    }

    fn split_index(
        &self,
        children: Vec<IndexEntry<Sphere<M>>>,
        bounds: SplitBounds,
    ) -> PageTreeResult<Partition<IndexEntry<Sphere<M>>>> {
        self.split(children, bounds, |c| &c.descriptor)
    }

    fn compute_descriptor(&self, node: &Node<(Sphere<M>, T), Sphere<M>>) -> Option<Sphere<M>> {
        match node {
            Node::Leaf { entries } => enclosing_sphere(entries.iter().map(|e| &e.0)),
            Node::Internal { children, .. } => enclosing_sphere(children.iter().map(|c| &c.descriptor)),
        }
    }

    fn normalize(&self, node: &mut Node<(Sphere<M>, T), Sphere<M>>, descriptor: &Sphere<M>) {
        match node {
            Node::Leaf { entries } => {
                for (sphere, _) in entries.iter_mut() {
                    let distance = descriptor.center_distance(sphere);
                    sphere.set_distance_to_parent(Some(distance));
                }
            }
            Node::Internal { children, .. } => {
                for child in children.iter_mut() {
                    let distance = descriptor.center_distance(&child.descriptor);
                    child.descriptor.set_distance_to_parent(Some(distance));
                }
            }
        }
    }

    fn check_node(
        &self,
        node: &Node<(Sphere<M>, T), Sphere<M>>,
        descriptor: &Sphere<M>,
    ) -> PageTreeResult<()> {
        let spheres: Vec<&Sphere<M>> = match node {
            Node::Leaf { entries } => entries.iter().map(|e| &e.0).collect(),
            Node::Internal { children, .. } => children.iter().map(|c| &c.descriptor).collect(),
        };
        for (pos, sphere) in spheres.iter().enumerate() {
            if sphere.dims() != descriptor.dims() {
                return Err(PageTreeError::invariant(&format!(
                    "entry {} of a node on level {} has {} dimensions, the node {}",
                    pos,
                    node.level(),
                    sphere.dims(),
                    descriptor.dims()
                )));
            }
            let actual = descriptor.center_distance(sphere);
            if distance_mismatch(sphere.distance_to_parent(), actual) {
                return Err(PageTreeError::invariant(&format!(
                    "entry {} of a node on level {} caches distance {:?} to its parent, actual {}",
                    pos,
                    node.level(),
                    sphere.distance_to_parent(),
                    actual
                )));
            }
        }
        Ok(())
    }
}

/// Range query filter.
///
/// The context of a node is the query sphere annotated with its distance to
/// the node centre, so that entries of the node are first tested against
/// their cached distances.
#[derive(Debug, Clone)]
pub struct Within<M>(pub Sphere<M>);

impl<M: Metric> QueryFilter<Sphere<M>> for Within<M> {
    type Context = Sphere<M>;

    fn enter(&self, node: &Sphere<M>) -> Sphere<M> {
        let distance = node.center_distance(&self.0);
        self.0.clone().with_distance_to_parent(Some(distance))
    }

    fn index(&self, ctx: &Sphere<M>, child: &Sphere<M>) -> bool {
        ctx.overlaps_pd(child)
    }
}
