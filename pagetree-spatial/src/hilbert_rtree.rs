//! Hilbert R-tree.
//!
//! Entries are kept in the order of the Hilbert value of their centre, taken
//! relative to a fixed universe rectangle. An index entry describes its
//! subtree twice: by the bounding rectangle, used to answer queries, and by
//! the range of Hilbert values, used to route insertions. Overflowing nodes
//! are cut at the Hilbert midpoint, so every node covers a contiguous piece
//! of the curve.

use std::marker::PhantomData;

use pagetree::container::Container;
use pagetree::descriptor::{Descriptor, KeyRange};
use pagetree::errors::{PageTreeError, PageTreeResult};
use pagetree::tree::{
    split_sorted_by, Capacity, IndexEntry, Node, NodeOf, NodeOps, Partition, QueryFilter,
    SplitBounds, Tree, TreeReport,
};
use serde::{Deserialize, Serialize};

use crate::errors::{SpatialError, SpatialResult};
use crate::hilbert::{hilbert_index_in, MAX_HILBERT_ORDER};
use crate::rectangle::Rectangle;
use crate::SpatialValue;

/// Default order of the curve: a 65536×65536 grid over the universe.
pub const DEFAULT_HILBERT_ORDER: u32 = 16;

/// Construction parameters of a [`HilbertRTree`].
#[derive(Debug, Clone, PartialEq)]
pub struct HilbertRTreeConfig {
    pub capacity: Capacity,
    /// 2-D rectangle the Hilbert values are computed relative to. Entries
    /// outside it are clamped onto its border.
    pub universe: Rectangle,
    pub order: u32,
}

impl HilbertRTreeConfig {
    pub fn new(capacity: Capacity, universe: Rectangle) -> Self {
        Self {
            capacity,
            universe,
            order: DEFAULT_HILBERT_ORDER,
        }
    }

    pub fn with_capacity(mut self, capacity: Capacity) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_universe(mut self, universe: Rectangle) -> Self {
        self.universe = universe;
        self
    }

    pub fn with_order(mut self, order: u32) -> Self {
        self.order = order;
        self
    }

    pub fn validate(&self) -> SpatialResult<()> {
        if self.universe.dims() != 2 {
            return Err(SpatialError::Configuration(format!(
                "Hilbert R-tree universe must be 2-dimensional, got {} dimensions",
                self.universe.dims()
            )));
        }
        if self.order == 0 || self.order > MAX_HILBERT_ORDER {
            return Err(SpatialError::Configuration(format!(
                "Hilbert order must be within [1, {}], got {}",
                MAX_HILBERT_ORDER, self.order
            )));
        }
        Ok(())
    }
}

/// Descriptor of the Hilbert R-tree: bounding rectangle plus the range of
/// Hilbert values below an index entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HilbertRegion {
    pub rect: Rectangle,
    pub keys: KeyRange<u64>,
}

impl Descriptor for HilbertRegion {
    fn overlaps(&self, other: &Self) -> bool {
        self.rect.overlaps(&other.rect) && self.keys.overlaps(&other.keys)
    }

    fn contains(&self, other: &Self) -> bool {
        self.rect.contains(&other.rect) && self.keys.contains(&other.keys)
    }

    fn union(&mut self, other: &Self) {
        self.rect.union(&other.rect);
        self.keys.union(&other.keys);
    }
}

/// Node operations of the Hilbert R-tree.
pub struct HilbertOps<T> {
    universe: Rectangle,
    order: u32,
    _values: PhantomData<fn() -> T>,
}

impl<T> HilbertOps<T> {
    pub fn new(universe: Rectangle, order: u32) -> Self {
        Self {
            universe,
            order,
            _values: PhantomData,
        }
    }

    /// Hilbert value of the centre of `rect`.
    pub fn key(&self, rect: &Rectangle) -> u64 {
        hilbert_index_in(&rect.center(), &self.universe, self.order)
    }
}

impl<T: SpatialValue> NodeOps for HilbertOps<T> {
    type Entry = (Rectangle, T);
    type Desc = HilbertRegion;

    fn descriptor(&self, entry: &(Rectangle, T)) -> HilbertRegion {
        HilbertRegion {
            rect: entry.0.clone(),
            keys: KeyRange::point(self.key(&entry.0)),
        }
    }

    fn choose_subtree(
        &self,
        children: &[IndexEntry<HilbertRegion>],
        desc: &HilbertRegion,
        _level: u32,
    ) -> usize {
        children
            .iter()
            .position(|child| child.descriptor.keys.max >= desc.keys.min)
            .unwrap_or(children.len() - 1)
    }

    fn grow_leaf(&self, entries: &mut Vec<(Rectangle, T)>, entry: (Rectangle, T)) {
        let key = self.key(&entry.0);
        let pos = entries.partition_point(|e| self.key(&e.0) <= key);
        entries.insert(pos, entry);
    }

    fn grow_index(
        &self,
        children: &mut Vec<IndexEntry<HilbertRegion>>,
        child: IndexEntry<HilbertRegion>,
    ) {
        let key = child.descriptor.keys.min;
        let pos = children.partition_point(|c| c.descriptor.keys.min <= key);
        children.insert(pos, child);
    }

    fn split_leaf(
        &self,
        entries: Vec<(Rectangle, T)>,
        bounds: SplitBounds,
    ) -> PageTreeResult<Partition<(Rectangle, T)>> {
        let first = (entries.len() / 2).clamp(bounds.min, bounds.max);
        Ok(split_sorted_by(entries, first, |e| self.key(&e.0)))
    }

    fn split_index(
        &self,
        children: Vec<IndexEntry<HilbertRegion>>,
        bounds: SplitBounds,
    ) -> PageTreeResult<Partition<IndexEntry<HilbertRegion>>> {
        let first = (children.len() / 2).clamp(bounds.min, bounds.max);
        Ok(split_sorted_by(children, first, |c| c.descriptor.keys.min))
    }

    fn check_node(
        &self,
        node: &Node<(Rectangle, T), HilbertRegion>,
        _descriptor: &HilbertRegion,
    ) -> PageTreeResult<()> {
        let keys: Vec<u64> = match node {
            Node::Leaf { entries } => entries.iter().map(|e| self.key(&e.0)).collect(),
            Node::Internal { children, .. } => {
                children.iter().map(|c| c.descriptor.keys.min).collect()
            }
        };
        match keys.windows(2).position(|pair| pair[0] > pair[1]) {
            Some(pos) => Err(PageTreeError::invariant(&format!(
                "node on level {} is out of Hilbert order at position {}",
                node.level(),
                pos + 1
            ))),
            None => Ok(()),
        }
    }
}

/// Accepts subtrees and entries whose rectangle overlaps the window,
/// ignoring Hilbert values.
struct Window(Rectangle);

impl QueryFilter<HilbertRegion> for Window {
    type Context = ();

    fn enter(&self, _node: &HilbertRegion) {}

    fn index(&self, _ctx: &(), child: &HilbertRegion) -> bool {
        child.rect.overlaps(&self.0)
    }
}

/// Node type of a Hilbert R-tree holding values of type `T`.
pub type HilbertNode<T> = NodeOf<HilbertOps<T>>;

/// Two-dimensional R-tree ordered by the Hilbert curve.
pub struct HilbertRTree<T: SpatialValue, C> {
    tree: Tree<HilbertOps<T>, C>,
    config: HilbertRTreeConfig,
}

impl<T, C> HilbertRTree<T, C>
where
    T: SpatialValue,
    C: Container<HilbertNode<T>>,
{
    /// Creates an empty tree in `container`.
    pub fn new(container: C, config: HilbertRTreeConfig) -> SpatialResult<Self> {
        config.validate()?;
        let ops = HilbertOps::new(config.universe.clone(), config.order);
        Ok(Self {
            tree: Tree::new(ops, container, config.capacity),
            config,
        })
    }

    /// Opens the tree persisted in `container`. The configuration must be the
    /// one the tree was built with.
    pub fn open(container: C, config: HilbertRTreeConfig) -> SpatialResult<Self> {
        config.validate()?;
        let ops = HilbertOps::new(config.universe.clone(), config.order);
        Ok(Self {
            tree: Tree::open(ops, container, config.capacity)?,
            config,
        })
    }

    pub fn engine(&self) -> &Tree<HilbertOps<T>, C> {
        &self.tree
    }

    pub fn container(&self) -> &C {
        self.tree.container()
    }

    pub fn config(&self) -> &HilbertRTreeConfig {
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
        self.tree.root().map(|root| root.descriptor.rect)
    }

    /// Hilbert value the tree assigns to `rect`.
    pub fn key(&self, rect: &Rectangle) -> u64 {
        self.tree.ops().key(rect)
    }

    fn check_dims(&self, rect: &Rectangle) -> SpatialResult<()> {
        if rect.dims() != 2 {
            return Err(SpatialError::InvalidOperation(format!(
                "{}-dimensional rectangle in a 2-dimensional Hilbert R-tree",
                rect.dims()
            )));
        }
        Ok(())
    }

    pub fn insert(&self, rect: Rectangle, value: T) -> SpatialResult<()> {
        self.check_dims(&rect)?;
        self.tree.insert((rect, value))?;
        Ok(())
    }

    /// Loads an empty tree with `entries`, sorted by Hilbert value first.
    pub fn bulk_load(&self, entries: Vec<(Rectangle, T)>) -> SpatialResult<()> {
        for (rect, _) in &entries {
            self.check_dims(rect)?;
        }
        let ops = self.tree.ops();
        let mut keyed: Vec<(u64, (Rectangle, T))> =
            entries.into_iter().map(|e| (ops.key(&e.0), e)).collect();
        keyed.sort_by_key(|(key, _)| *key);
        log::debug!("bulk loading {} entries in Hilbert order", keyed.len());
        self.tree
            .bulk_load(keyed.into_iter().map(|(_, entry)| entry).collect())?;
        Ok(())
    }

    /// Removes the entry `(rect, value)`. Returns whether it was present.
    pub fn remove(&self, rect: &Rectangle, value: &T) -> SpatialResult<bool>
    where
        T: PartialEq,
    {
        let desc = HilbertRegion {
            rect: rect.clone(),
            keys: KeyRange::point(self.key(rect)),
        };
        let removed = self
            .tree
            .remove(&desc, |(r, v)| r == rect && v == value)?;
        Ok(removed.is_some())
    }

    /// Entries whose rectangle overlaps `rect`. Lazy.
    pub fn query(
        &self,
        rect: &Rectangle,
    ) -> impl Iterator<Item = SpatialResult<(Rectangle, T)>> + '_ {
        self.tree
            .query(Window(rect.clone()), 0)
            .entries()
            .map(|entry| entry.map_err(SpatialError::from))
    }

    /// Entries in ascending distance from `point`, with the distance.
    pub fn nearest_iter(
        &self,
        point: &[f64],
    ) -> impl Iterator<Item = SpatialResult<(Rectangle, T, f64)>> + '_ {
        let point = point.to_vec();
        self.tree
            .best_first(
                move |region: &HilbertRegion| Some(region.rect.min_dist(&point)),
                0,
            )
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

#[cfg(test)]
mod tests {
    use super::*;
    use pagetree::container::{BlockFileConfig, BlockFileContainer, MemoryContainer};
    use pagetree::tree::All;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use tempfile::tempdir;

    type MemHilbert = HilbertRTree<u32, MemoryContainer<HilbertNode<u32>>>;

    fn universe() -> Rectangle {
        Rectangle::new_2d(0.0, 0.0, 1000.0, 1000.0)
    }

    fn tree() -> MemHilbert {
        let config = HilbertRTreeConfig::new(Capacity::new(3, 8).unwrap(), universe());
        HilbertRTree::new(MemoryContainer::new(), config).unwrap()
    }

    fn random_rects(seed: u64, n: u32) -> Vec<(Rectangle, u32)> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|id| {
                let x = rng.gen_range(0.0..990.0);
                let y = rng.gen_range(0.0..990.0);
                (Rectangle::new_2d(x, y, x + rng.gen_range(0.0..10.0), y + 1.0), id)
            })
            .collect()
    }

    fn brute_force(entries: &[(Rectangle, u32)], window: &Rectangle) -> Vec<u32> {
        let mut ids: Vec<u32> = entries
            .iter()
            .filter(|(r, _)| r.overlaps(window))
            .map(|(_, id)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    fn query_ids(tree: &MemHilbert, window: &Rectangle) -> Vec<u32> {
        let mut ids: Vec<u32> = tree.query(window).map(|hit| hit.unwrap().1).collect();
        ids.sort_unstable();
        ids
    }

    #[test]
    fn test_config_validation() {
        let capacity = Capacity::new(2, 4).unwrap();
        let cube = Rectangle::new(vec![0.0; 3], vec![1.0; 3]).unwrap();
        assert!(HilbertRTreeConfig::new(capacity, cube).validate().is_err());
        let config = HilbertRTreeConfig::new(capacity, universe());
        assert!(config.clone().with_order(0).validate().is_err());
        assert!(config.clone().with_order(33).validate().is_err());
        assert!(config.with_order(32).validate().is_ok());
    }

    #[test]
    fn test_insert_keeps_leaves_in_hilbert_order() {
        let entries = random_rects(7, 500);
        let tree = tree();
        for (rect, id) in &entries {
            tree.insert(rect.clone(), *id).unwrap();
        }
        let report = tree.check().unwrap();
        assert_eq!(report.entries, 500);

        // a full scan walks the leaves left to right
        let keys: Vec<u64> = tree
            .engine()
            .query(All::new(), 0)
            .entries()
            .map(|e| tree.key(&e.unwrap().0))
            .collect();
        assert!(keys.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[test]
    fn test_window_queries_match_brute_force() {
        let entries = random_rects(8, 400);
        let tree = tree();
        for (rect, id) in &entries {
            tree.insert(rect.clone(), *id).unwrap();
        }
        let mut rng = StdRng::seed_from_u64(9);
        for _ in 0..20 {
            let x = rng.gen_range(0.0..800.0);
            let y = rng.gen_range(0.0..800.0);
            let window = Rectangle::new_2d(x, y, x + 200.0, y + 150.0);
            assert_eq!(query_ids(&tree, &window), brute_force(&entries, &window));
        }
        assert_eq!(tree.container().fixed_count(), 0);
    }

    #[test]
    fn test_bulk_load_matches_inserts() {
        let entries = random_rects(10, 300);
        let loaded = tree();
        loaded.bulk_load(entries.clone()).unwrap();
        let report = loaded.check().unwrap();
        assert_eq!(report.entries, 300);

        let window = Rectangle::new_2d(100.0, 100.0, 600.0, 400.0);
        assert_eq!(query_ids(&loaded, &window), brute_force(&entries, &window));

        // a loaded tree takes further inserts
        loaded.insert(Rectangle::point(&[5.0, 5.0]), 999).unwrap();
        assert_eq!(loaded.check().unwrap().entries, 301);
        assert!(loaded.bulk_load(entries).is_err());
    }

    #[test]
    fn test_remove_and_nearest() {
        let entries = random_rects(11, 200);
        let tree = tree();
        for (rect, id) in &entries {
            tree.insert(rect.clone(), *id).unwrap();
        }
        for (rect, id) in entries.iter().filter(|(_, id)| id % 2 == 0) {
            assert!(tree.remove(rect, id).unwrap());
        }
        assert!(!tree.remove(&entries[0].0, &0).unwrap());
        tree.check().unwrap();
        assert_eq!(tree.len(), 100);

        let point = [500.0, 500.0];
        let found = tree.knn(&point, 5).unwrap();
        let mut expected: Vec<f64> = entries
            .iter()
            .filter(|(_, id)| id % 2 == 1)
            .map(|(r, _)| r.min_dist(&point))
            .collect();
        expected.sort_by(f64::total_cmp);
        let distances: Vec<f64> = found.iter().map(|(_, _, d)| *d).collect();
        assert_eq!(distances, expected[..5].to_vec());
    }

    #[test]
    fn test_rejects_other_dimensions() {
        let tree = tree();
        let cube = Rectangle::new(vec![0.0; 3], vec![1.0; 3]).unwrap();
        assert!(matches!(
            tree.insert(cube, 1),
            Err(SpatialError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_persists_in_block_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hilbert.db");
        let entries = random_rects(12, 150);
        let config = HilbertRTreeConfig::new(Capacity::new(4, 16).unwrap(), universe()).with_order(12);
        {
            let container =
                BlockFileContainer::create(&path, BlockFileConfig::default().with_block_size(2048))
                    .unwrap();
            let tree: HilbertRTree<u32, _> = HilbertRTree::new(container, config.clone()).unwrap();
            for (rect, id) in &entries {
                tree.insert(rect.clone(), *id).unwrap();
            }
            tree.flush().unwrap();
        }
        let container = BlockFileContainer::open(&path, 64).unwrap();
        let tree: HilbertRTree<u32, _> = HilbertRTree::open(container, config).unwrap();
        assert_eq!(tree.len(), 150);
        tree.check().unwrap();
        let everything = universe();
        assert_eq!(tree.query(&everything).count(), 150);
    }
}
