use pagetree::container::Container;
use pagetree::tree::{encoded_size, Capacity, IndexEntry, NodeOf, Tree, TreeReport};

use super::ops::{MTreeOps, Within};
use super::split::{PartitionStrategy, PromotionStrategy};
use crate::errors::{SpatialError, SpatialResult};
use crate::metric::Metric;
use crate::sphere::Sphere;
use crate::SpatialValue;

/// Construction parameters of an [`MTree`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MTreeConfig {
    pub capacity: Capacity,
    pub promotion: PromotionStrategy,
    pub partition: PartitionStrategy,
}

impl MTreeConfig {
    /// Promotion by distance to parent and hyperplane partitioning.
    pub fn new(capacity: Capacity) -> Self {
        Self {
            capacity,
            promotion: PromotionStrategy::default(),
            partition: PartitionStrategy::default(),
        }
    }

    /// Slim-tree configuration: splits by minimum spanning tree.
    pub fn slim(capacity: Capacity) -> Self {
        Self::new(capacity).with_promotion(PromotionStrategy::MinimumSpanningTree)
    }

    pub fn with_capacity(mut self, capacity: Capacity) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_promotion(mut self, promotion: PromotionStrategy) -> Self {
        self.promotion = promotion;
        self
    }

    pub fn with_partition(mut self, partition: PartitionStrategy) -> Self {
        self.partition = partition;
        self
    }
}

/// Node type of an M-tree over the metric `M` holding values of type `T`.
pub type MTreeNode<M, T> = NodeOf<MTreeOps<M, T>>;

/// M-tree of objects of a metric space.
///
/// Objects are balls of the metric `M`; a point is a ball of radius zero.
/// Subtrees are described by covering balls, and every ball in a node
/// remembers its distance to the node's centre so that queries can discard
/// most entries without computing a distance.
pub struct MTree<T: SpatialValue, M: Metric, C> {
    tree: Tree<MTreeOps<M, T>, C>,
    config: MTreeConfig,
}

impl<T, M, C> MTree<T, M, C>
where
    T: SpatialValue,
    M: Metric,
    C: Container<MTreeNode<M, T>>,
{
    pub fn new(container: C, config: MTreeConfig) -> Self {
        let ops = MTreeOps::new(config.promotion, config.partition);
        Self {
            tree: Tree::new(ops, container, config.capacity),
            config,
        }
    }

    /// Opens the tree persisted in `container` by an earlier [`flush`](Self::flush).
    pub fn open(container: C, config: MTreeConfig) -> SpatialResult<Self> {
        let ops = MTreeOps::new(config.promotion, config.partition);
        Ok(Self {
            tree: Tree::open(ops, container, config.capacity)?,
            config,
        })
    }

    /// Capacity fitting `dims`-dimensional objects like `sample` into blocks
    /// of `block_size` bytes.
    pub fn capacity_for(
        block_size: usize,
        dims: usize,
        sample: &T,
        min_ratio: f64,
    ) -> SpatialResult<Capacity> {
        let sphere = Sphere::<M>::point(vec![0.0; dims]).with_distance_to_parent(Some(0.0));
        let leaf_bytes = encoded_size(&(sphere.clone(), sample.clone()))?;
        let index_bytes = encoded_size(&IndexEntry::new(u64::MAX, sphere, u32::MAX))?;
        Ok(Capacity::from_block_size(
            block_size,
            leaf_bytes,
            index_bytes,
            min_ratio,
        )?)
    }

    pub fn engine(&self) -> &Tree<MTreeOps<M, T>, C> {
        &self.tree
    }

    pub fn container(&self) -> &C {
        self.tree.container()
    }

    pub fn config(&self) -> &MTreeConfig {
        &self.config
    }

    pub fn len(&self) -> u64 {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn height(&self) -> u32 {
        self.tree.height()
    }

    /// Ball covering everything in the tree.
    pub fn bounds(&self) -> Option<Sphere<M>> {
        self.tree.root().map(|root| root.descriptor)
    }

    fn check_dims(&self, dims: usize) -> SpatialResult<()> {
        match self.bounds() {
            Some(bounds) if bounds.dims() != dims => Err(SpatialError::InvalidOperation(format!(
                "{}-dimensional object in a {}-dimensional tree",
                dims,
                bounds.dims()
            ))),
            _ => Ok(()),
        }
    }

    /// Inserts the point `center`.
    pub fn insert(&self, center: Vec<f64>, value: T) -> SpatialResult<()> {
        self.insert_sphere(Sphere::new(center, 0.0)?, value)
    }

    /// Inserts an object with extent.
    pub fn insert_sphere(&self, sphere: Sphere<M>, value: T) -> SpatialResult<()> {
        self.check_dims(sphere.dims())?;
        let sphere = sphere.with_distance_to_parent(None);
        self.tree.insert((sphere, value))?;
        Ok(())
    }

    /// Removes an object centred at `center` holding `value`. Returns
    /// whether one was present.
    pub fn remove(&self, center: &[f64], value: &T) -> SpatialResult<bool>
    where
        T: PartialEq,
    {
        let probe = Sphere::<M>::point(center.to_vec());
        let removed = self
            .tree
            .remove(&probe, |(s, v)| s.center() == center && v == value)?;
        Ok(removed.is_some())
    }

    /// Objects within `radius` of `center`. Lazy.
    pub fn range(
        &self,
        center: &[f64],
        radius: f64,
    ) -> SpatialResult<impl Iterator<Item = SpatialResult<(Sphere<M>, T)>> + '_> {
        let query = Sphere::new(center.to_vec(), radius)?;
        Ok(self
            .tree
            .query(Within(query), 0)
            .entries()
            .map(|entry| entry.map_err(SpatialError::from)))
    }

    /// Objects in ascending distance from `point`, with the distance.
    pub fn nearest_iter(
        &self,
        point: &[f64],
    ) -> impl Iterator<Item = SpatialResult<(Sphere<M>, T, f64)>> + '_ {
        let point = point.to_vec();
        self.tree
            .best_first(move |sphere: &Sphere<M>| Some(sphere.min_dist(&point)), 0)
            .filter_map(|found| match found {
                Ok((item, distance)) => item.into_data().map(|(s, v)| Ok((s, v, distance))),
                Err(err) => Some(Err(SpatialError::from(err))),
            })
    }

    pub fn nearest(&self, point: &[f64]) -> SpatialResult<Option<(Sphere<M>, T, f64)>> {
        self.nearest_iter(point).next().transpose()
    }

    /// The `k` objects nearest to `point`, nearest first.
    pub fn knn(&self, point: &[f64], k: usize) -> SpatialResult<Vec<(Sphere<M>, T, f64)>> {
        self.nearest_iter(point).take(k).collect()
    }

    /// Verifies the tree, including every cached distance to a parent.
    pub fn check(&self) -> SpatialResult<TreeReport> {
        Ok(self.tree.check()?)
    }

    pub fn flush(&self) -> SpatialResult<()> {
        Ok(self.tree.flush()?)
    }
}
