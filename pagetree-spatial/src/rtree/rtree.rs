use pagetree::container::Container;
use pagetree::tree::{encoded_size, Capacity, IndexEntry, NodeOf, Overlaps, Tree, TreeReport};

use super::ops::{ContainedIn, RTreeOps};
use super::split::SplitStrategy;
use crate::errors::{SpatialError, SpatialResult};
use crate::rectangle::Rectangle;
use crate::SpatialValue;

/// Construction parameters of an [`RTree`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RTreeConfig {
    pub capacity: Capacity,
    pub split: SplitStrategy,
}

impl RTreeConfig {
    /// R* splits with the given capacity.
    pub fn new(capacity: Capacity) -> Self {
        Self {
            capacity,
            split: SplitStrategy::default(),
        }
    }

    pub fn with_capacity(mut self, capacity: Capacity) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_split(mut self, split: SplitStrategy) -> Self {
        self.split = split;
        self
    }
}

/// Node type of an R-tree holding values of type `T`.
pub type RTreeNode<T> = NodeOf<RTreeOps<T>>;

/// R-tree of `(rectangle, value)` entries.
///
/// All rectangles of one tree have the same number of dimensions.
///
/// # Examples
///
/// ```rust
/// use pagetree::container::MemoryContainer;
/// use pagetree::tree::Capacity;
/// use pagetree_spatial::{RTree, RTreeConfig, Rectangle, SplitStrategy};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = RTreeConfig::new(Capacity::new(2, 8)?).with_split(SplitStrategy::Quadratic);
/// let tree = RTree::new(MemoryContainer::new(), config);
/// tree.insert(Rectangle::new_2d(0.0, 0.0, 10.0, 10.0), 1u64)?;
/// tree.insert(Rectangle::new_2d(20.0, 20.0, 30.0, 30.0), 2u64)?;
///
/// let hits: Vec<u64> = tree
///     .query(&Rectangle::new_2d(5.0, 5.0, 15.0, 15.0))
///     .map(|hit| hit.map(|(_, id)| id))
///     .collect::<Result<_, _>>()?;
/// assert_eq!(hits, vec![1]);
///
/// let (_, id, distance) = tree.nearest(&[26.0, 35.0])?.unwrap();
/// assert_eq!((id, distance), (2, 5.0));
/// # Ok(())
/// # }
/// ```
pub struct RTree<T: SpatialValue, C> {
    tree: Tree<RTreeOps<T>, C>,
    config: RTreeConfig,
}

impl<T, C> RTree<T, C>
where
    T: SpatialValue,
    C: Container<RTreeNode<T>>,
{
    /// Creates an empty tree in `container`.
    pub fn new(container: C, config: RTreeConfig) -> Self {
        Self {
            tree: Tree::new(RTreeOps::new(config.split), container, config.capacity),
            config,
        }
    }

    /// Opens the tree persisted in `container` by an earlier [`flush`](Self::flush).
    pub fn open(container: C, config: RTreeConfig) -> SpatialResult<Self> {
        Ok(Self {
            tree: Tree::open(RTreeOps::new(config.split), container, config.capacity)?,
            config,
        })
    }

    /// Capacity fitting entries shaped like `sample` into blocks of
    /// `block_size` bytes.
    pub fn capacity_for(
        block_size: usize,
        sample: &(Rectangle, T),
        min_ratio: f64,
    ) -> SpatialResult<Capacity> {
        let leaf_bytes = encoded_size(sample)?;
        let index_bytes = encoded_size(&IndexEntry::new(u64::MAX, sample.0.clone(), u32::MAX))?;
        Ok(Capacity::from_block_size(
            block_size,
            leaf_bytes,
            index_bytes,
            min_ratio,
        )?)
    }

    /// The underlying engine.
    pub fn engine(&self) -> &Tree<RTreeOps<T>, C> {
        &self.tree
    }

    pub fn container(&self) -> &C {
        self.tree.container()
    }

    pub fn config(&self) -> &RTreeConfig {
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

    /// Bounding rectangle of everything in the tree.
    pub fn bounds(&self) -> Option<Rectangle> {
        self.tree.root().map(|root| root.descriptor)
    }

    fn check_dims(&self, rect: &Rectangle) -> SpatialResult<()> {
        match self.bounds() {
            Some(bounds) if bounds.dims() != rect.dims() => {
                Err(SpatialError::InvalidOperation(format!(
                    "{}-dimensional rectangle in a {}-dimensional tree",
                    rect.dims(),
                    bounds.dims()
                )))
            }
            _ => Ok(()),
        }
    }

    pub fn insert(&self, rect: Rectangle, value: T) -> SpatialResult<()> {
        self.check_dims(&rect)?;
        self.tree.insert((rect, value))?;
        Ok(())
    }

    /// Removes the entry `(rect, value)`. Returns whether it was present.
    pub fn remove(&self, rect: &Rectangle, value: &T) -> SpatialResult<bool>
    where
        T: PartialEq,
    {
        let removed = self
            .tree
            .remove(rect, |(r, v)| r == rect && v == value)?;
        Ok(removed.is_some())
    }

    /// Moves the entry `(rect, value)` to `new_rect` with `new_value`.
    /// Returns whether the entry was present; nothing is inserted otherwise.
    pub fn update(
        &self,
        rect: &Rectangle,
        value: &T,
        new_rect: Rectangle,
        new_value: T,
    ) -> SpatialResult<bool>
    where
        T: PartialEq,
    {
        self.check_dims(&new_rect)?;
        let old = self
            .tree
            .update(rect, |(r, v)| r == rect && v == value, (new_rect, new_value))?;
        Ok(old.is_some())
    }

    /// Entries whose rectangle overlaps `rect`. Lazy.
    pub fn query(
        &self,
        rect: &Rectangle,
    ) -> impl Iterator<Item = SpatialResult<(Rectangle, T)>> + '_ {
        self.tree
            .query(Overlaps(rect.clone()), 0)
            .entries()
            .map(|entry| entry.map_err(SpatialError::from))
    }

    /// Entries whose rectangle lies completely inside `rect`. Lazy.
    pub fn contained_in(
        &self,
        rect: &Rectangle,
    ) -> impl Iterator<Item = SpatialResult<(Rectangle, T)>> + '_ {
        self.tree
            .query(ContainedIn(rect.clone()), 0)
            .entries()
            .map(|entry| entry.map_err(SpatialError::from))
    }

    /// Index entries held by nodes on `level` whose rectangle overlaps
    /// `rect`; level 1 yields the leaves.
    pub fn query_level(
        &self,
        rect: &Rectangle,
        level: u32,
    ) -> impl Iterator<Item = SpatialResult<IndexEntry<Rectangle>>> + '_ {
        self.tree
            .query(Overlaps(rect.clone()), level)
            .filter_map(|item| match item {
                Ok(item) => item.into_index().map(Ok),
                Err(err) => Some(Err(SpatialError::from(err))),
            })
    }

    /// Entries in ascending distance from `point`, with the distance.
    pub fn nearest_iter(
        &self,
        point: &[f64],
    ) -> impl Iterator<Item = SpatialResult<(Rectangle, T, f64)>> + '_ {
        let point = point.to_vec();
        self.tree
            .best_first(move |rect: &Rectangle| Some(rect.min_dist(&point)), 0)
            .filter_map(|found| match found {
                Ok((item, distance)) => item.into_data().map(|(r, v)| Ok((r, v, distance))),
                Err(err) => Some(Err(SpatialError::from(err))),
            })
    }

    pub fn nearest(&self, point: &[f64]) -> SpatialResult<Option<(Rectangle, T, f64)>> {
        self.nearest_iter(point).next().transpose()
    }

    /// The `k` entries nearest to `point`, nearest first.
    pub fn knn(&self, point: &[f64], k: usize) -> SpatialResult<Vec<(Rectangle, T, f64)>> {
        self.nearest_iter(point).take(k).collect()
    }

    pub fn check(&self) -> SpatialResult<TreeReport> {
        Ok(self.tree.check()?)
    }

    pub fn flush(&self) -> SpatialResult<()> {
        Ok(self.tree.flush()?)
    }
}
