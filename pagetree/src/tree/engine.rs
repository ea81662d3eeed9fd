//! Generic grow/split/post tree.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::best_first::BestFirst;
use super::capacity::Capacity;
use super::cursor::{Cursor, QueryFilter};
use super::node::{IndexEntry, Item, Node};
use super::ops::{check_partition, NodeOps};
use super::path::{Frame, Path};
use crate::container::Container;
use crate::descriptor::Descriptor;
use crate::errors::{PageTreeError, PageTreeResult};

/// Node type stored by a tree with node operations `S`.
pub type NodeOf<S> = Node<<S as NodeOps>::Entry, <S as NodeOps>::Desc>;

/// Tree state persisted through the container metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeMeta<D> {
    /// Entry referencing the root; `parent_level` equals the height
    pub root: Option<IndexEntry<D>>,
    /// Number of levels (0 for an empty tree)
    pub height: u32,
    /// Number of data entries
    pub len: u64,
}

impl<D> Default for TreeMeta<D> {
    fn default() -> Self {
        Self {
            root: None,
            height: 0,
            len: 0,
        }
    }
}

/// A paginated tree over a [`Container`].
///
/// The variant-specific behaviour comes from the [`NodeOps`] value `S`; the
/// engine owns descent, growing, splitting, posting split results upward and
/// growing the root. Removal, update and the consistency check live in the
/// overlapping-region layer ([`super::ortree`]).
///
/// All methods take `&self`. Mutations are serialised by the tree state lock;
/// cursors copy the root entry when they are created.
pub struct Tree<S: NodeOps, C> {
    pub(crate) ops: S,
    pub(crate) container: C,
    pub(crate) capacity: Capacity,
    pub(crate) meta: RwLock<TreeMeta<S::Desc>>,
}

impl<S, C> Tree<S, C>
where
    S: NodeOps,
    C: Container<NodeOf<S>>,
{
    /// Creates an empty tree. Existing container metadata is ignored.
    pub fn new(ops: S, container: C, capacity: Capacity) -> Self {
        Self {
            ops,
            container,
            capacity,
            meta: RwLock::new(TreeMeta::default()),
        }
    }

    /// Restores a tree from the metadata stored in `container`, or creates an
    /// empty one when the container carries none.
    pub fn open(ops: S, container: C, capacity: Capacity) -> PageTreeResult<Self> {
        let meta = match container.metadata()? {
            Some(bytes) => {
                let (meta, _): (TreeMeta<S::Desc>, usize) =
                    bincode::serde::decode_from_slice(&bytes, bincode::config::legacy())?;
                meta
            }
            None => TreeMeta::default(),
        };
        log::debug!(
            "Opened tree of height {} with {} entries",
            meta.height,
            meta.len
        );
        Ok(Self {
            ops,
            container,
            capacity,
            meta: RwLock::new(meta),
        })
    }

    /// Persists the tree state and flushes the container.
    pub fn flush(&self) -> PageTreeResult<()> {
        let bytes = {
            let meta = self.meta.read();
            bincode::serde::encode_to_vec(&*meta, bincode::config::legacy())?
        };
        self.container.set_metadata(&bytes)?;
        self.container.flush()
    }

    pub fn ops(&self) -> &S {
        &self.ops
    }

    pub fn container(&self) -> &C {
        &self.container
    }

    pub fn capacity(&self) -> &Capacity {
        &self.capacity
    }

    pub fn len(&self) -> u64 {
        self.meta.read().len
    }

    pub fn is_empty(&self) -> bool {
        self.meta.read().len == 0
    }

    pub fn height(&self) -> u32 {
        self.meta.read().height
    }

    /// Entry referencing the root node.
    pub fn root(&self) -> Option<IndexEntry<S::Desc>> {
        self.meta.read().root.clone()
    }

    /// Inserts a data entry.
    pub fn insert(&self, entry: S::Entry) -> PageTreeResult<()> {
        let mut meta = self.meta.write();
        self.insert_locked(&mut meta, Item::Data(entry))?;
        meta.len += 1;
        Ok(())
    }

    /// Inserts an item into the node on the item's level (0 for data entries,
    /// `parent_level` for index entries).
    pub fn insert_item(&self, item: Item<S::Entry, S::Desc>) -> PageTreeResult<()> {
        let mut meta = self.meta.write();
        let data = matches!(item, Item::Data(_));
        self.insert_locked(&mut meta, item)?;
        if data {
            meta.len += 1;
        }
        Ok(())
    }

    /// Lazy query yielding the items on `target_level` accepted by `filter`.
    pub fn query<F>(&self, filter: F, target_level: u32) -> Cursor<'_, S, C, F>
    where
        F: QueryFilter<S::Desc>,
    {
        Cursor::new(&self.ops, &self.container, self.root(), filter, target_level)
    }

    /// Best-first query ordered by `priority` (smallest first). The priority
    /// of a subtree must not exceed the priority of anything inside it;
    /// `None` prunes.
    pub fn best_first<P>(&self, priority: P, target_level: u32) -> BestFirst<'_, S, C, P>
    where
        P: Fn(&S::Desc) -> Option<f64>,
    {
        BestFirst::new(&self.ops, &self.container, self.root(), priority, target_level)
    }

    pub(crate) fn item_descriptor(&self, item: &Item<S::Entry, S::Desc>) -> S::Desc {
        match item {
            Item::Data(entry) => self.ops.descriptor(entry),
            Item::Index(entry) => entry.descriptor.clone(),
        }
    }

    /// Grow-and-post insertion with the state lock held.
    pub(crate) fn insert_locked(
        &self,
        meta: &mut TreeMeta<S::Desc>,
        item: Item<S::Entry, S::Desc>,
    ) -> PageTreeResult<()> {
        let target = item.level();
        let desc = self.item_descriptor(&item);

        let mut root = match meta.root.clone() {
            Some(root) => root,
            None => return self.plant_root(meta, item, desc),
        };

        // an item above the root level grows the tree upward first
        while target > root.child_level() {
            root = self.wrap_root(meta, root)?;
        }

        if !root.descriptor.contains(&desc) {
            root.descriptor.union(&desc);
        }
        meta.root = Some(root.clone());

        let mut path = Path::new(&self.container);
        path.push(root, None)?;
        loop {
            let frame = top(&mut path)?;
            let level = frame.node.level();
            if level == target {
                break;
            }
            let children = frame.node.children_mut().ok_or_else(|| {
                PageTreeError::invariant(&format!(
                    "descent reached a leaf above target level {}",
                    target
                ))
            })?;
            if children.is_empty() {
                return Err(PageTreeError::invariant(&format!(
                    "cannot choose a subtree of node {} on level {}: node has no entries",
                    frame.entry.id, level
                )));
            }
            let idx = self.ops.choose_subtree(children, &desc, level);
            let len = children.len();
            let child = children.get_mut(idx).ok_or_else(|| {
                PageTreeError::invariant(&format!(
                    "chosen subtree {} out of range ({} entries)",
                    idx, len
                ))
            })?;
            if !child.descriptor.contains(&desc) {
                child.descriptor.union(&desc);
                frame.dirty = true;
            }
            let entry = child.clone();
            path.push(entry, Some(idx))?;
        }

        let frame = top(&mut path)?;
        grow(&self.ops, &mut frame.node, item)?;
        self.ops.normalize(&mut frame.node, &frame.entry.descriptor);
        frame.dirty = true;
        widen_path(&mut path)?;

        self.post(meta, path)
    }

    /// Makes `item` the content of an empty tree.
    fn plant_root(
        &self,
        meta: &mut TreeMeta<S::Desc>,
        item: Item<S::Entry, S::Desc>,
        desc: S::Desc,
    ) -> PageTreeResult<()> {
        match item {
            Item::Data(entry) => {
                let mut node = Node::leaf(vec![entry]);
                self.ops.normalize(&mut node, &desc);
                let id = self.container.insert(&node)?;
                meta.root = Some(IndexEntry::new(id, desc, 1));
                meta.height = 1;
            }
            Item::Index(entry) => {
                // the referenced subtree becomes the whole tree
                meta.height = entry.parent_level;
                meta.root = Some(entry);
            }
        }
        log::trace!("planted root, height {}", meta.height);
        Ok(())
    }

    /// Puts a new root with the old root as its single child above the tree.
    fn wrap_root(
        &self,
        meta: &mut TreeMeta<S::Desc>,
        root: IndexEntry<S::Desc>,
    ) -> PageTreeResult<IndexEntry<S::Desc>> {
        let level = root.parent_level;
        let desc = root.descriptor.clone();
        let mut node = Node::internal(vec![root], level);
        self.ops.normalize(&mut node, &desc);
        let id = self.container.insert(&node)?;
        let entry = IndexEntry::new(id, desc, level + 1);
        meta.root = Some(entry.clone());
        meta.height = level + 1;
        Ok(entry)
    }

    /// Redresses overflows from the top of the path upward, then releases it.
    pub(crate) fn post(
        &self,
        meta: &mut TreeMeta<S::Desc>,
        mut path: Path<'_, C, S::Entry, S::Desc>,
    ) -> PageTreeResult<()> {
        loop {
            let frame = top(&mut path)?;
            if !self.capacity.overflows(frame.node.level(), frame.node.len()) {
                break;
            }
            let sibling = self.split(frame)?;

            if path.len() == 1 {
                let frame = path.pop()?.ok_or_else(empty_path)?;
                return self.grow_root(meta, frame.entry, sibling);
            }

            let frame = path.pop()?.ok_or_else(empty_path)?;
            let idx = frame.child_idx.ok_or_else(empty_path)?;
            let parent = top(&mut path)?;
            let children = parent
                .node
                .children_mut()
                .ok_or_else(|| PageTreeError::invariant("parent of a split node is a leaf"))?;
            if idx >= children.len() {
                return Err(PageTreeError::invariant(&format!(
                    "split node position {} out of range in node {}",
                    idx, parent.entry.id
                )));
            }
            let first = frame.entry.descriptor.clone();
            let second = sibling.descriptor.clone();
            children[idx] = frame.entry;
            children.insert(idx + 1, sibling);
            parent.dirty = true;
            for desc in [&first, &second] {
                if !parent.entry.descriptor.contains(desc) {
                    parent.entry.descriptor.union(desc);
                }
            }
            self.ops.normalize(&mut parent.node, &parent.entry.descriptor);
            widen_path(&mut path)?;
        }
        self.release(meta, path)
    }

    /// Splits the node of `frame` in place. The frame keeps the first
    /// partition; the second is stored as a new node whose index entry is
    /// returned.
    pub(crate) fn split(
        &self,
        frame: &mut Frame<S::Entry, S::Desc>,
    ) -> PageTreeResult<IndexEntry<S::Desc>> {
        let level = frame.node.level();
        let len = frame.node.len();
        let bounds = self.capacity.split_bounds(level, len);
        let empty = frame.node.empty_like();

        let (mut first, mut second) = match std::mem::replace(&mut frame.node, empty) {
            Node::Leaf { entries } => {
                let partition = self.ops.split_leaf(entries, bounds)?;
                check_partition(&partition, bounds)?;
                (Node::leaf(partition.0), Node::leaf(partition.1))
            }
            Node::Internal { children, level } => {
                let partition = self.ops.split_index(children, bounds)?;
                check_partition(&partition, bounds)?;
                (
                    Node::internal(partition.0, level),
                    Node::internal(partition.1, level),
                )
            }
        };

        let first_desc = self
            .ops
            .compute_descriptor(&first)
            .ok_or_else(|| PageTreeError::invariant("split left the first node empty"))?;
        let second_desc = self
            .ops
            .compute_descriptor(&second)
            .ok_or_else(|| PageTreeError::invariant("split left the second node empty"))?;
        self.ops.normalize(&mut first, &first_desc);
        self.ops.normalize(&mut second, &second_desc);

        let id = self.container.insert(&second)?;
        log::debug!(
            "split node {} on level {}: {} + {} entries, new node {}",
            frame.entry.id,
            level,
            first.len(),
            second.len(),
            id
        );

        frame.node = first;
        frame.entry.descriptor = first_desc;
        frame.dirty = true;
        Ok(IndexEntry::new(id, second_desc, level + 1))
    }

    /// Creates a new root above a split root.
    fn grow_root(
        &self,
        meta: &mut TreeMeta<S::Desc>,
        left: IndexEntry<S::Desc>,
        right: IndexEntry<S::Desc>,
    ) -> PageTreeResult<()> {
        let level = left.parent_level;
        let mut node = Node::internal(vec![left, right], level);
        let desc = self
            .ops
            .compute_descriptor(&node)
            .ok_or_else(|| PageTreeError::invariant("new root without entries"))?;
        self.ops.normalize(&mut node, &desc);
        let id = self.container.insert(&node)?;
        meta.root = Some(IndexEntry::new(id, desc, level + 1));
        meta.height = level + 1;
        log::debug!("root split, tree grew to height {}", meta.height);
        Ok(())
    }

    /// Writes back every frame from the top down. The bottom frame's entry
    /// becomes the root entry.
    pub(crate) fn release(
        &self,
        meta: &mut TreeMeta<S::Desc>,
        mut path: Path<'_, C, S::Entry, S::Desc>,
    ) -> PageTreeResult<()> {
        while let Some(mut frame) = path.take() {
            if frame.dirty {
                self.ops.normalize(&mut frame.node, &frame.entry.descriptor);
            }
            path.release(&frame)?;
            if path.is_empty() {
                meta.root = Some(frame.entry);
            }
        }
        Ok(())
    }
}

pub(crate) fn top<'p, C, E, D>(path: &'p mut Path<'_, C, E, D>) -> PageTreeResult<&'p mut Frame<E, D>>
where
    C: Container<Node<E, D>>,
{
    path.top_mut().ok_or_else(empty_path)
}

pub(crate) fn empty_path() -> PageTreeError {
    PageTreeError::invariant("path stack is unexpectedly empty")
}

/// Walks from the top of the path to the bottom and grows every entry until it
/// contains the entry of the frame above it, keeping the child entries held by
/// the parents in step.
///
/// Unions of rectangles and key ranges are transitive and never trigger this;
/// sphere unions keep their centre and can leave a parent smaller than its
/// widened child.
pub(crate) fn widen_path<C, E, D>(path: &mut Path<'_, C, E, D>) -> PageTreeResult<()>
where
    C: Container<Node<E, D>>,
    D: Descriptor,
{
    for depth in (1..path.len()).rev() {
        let (entry, idx) = match path.frame(depth) {
            Some(frame) => (
                frame.entry.clone(),
                frame.child_idx.ok_or_else(empty_path)?,
            ),
            None => return Err(empty_path()),
        };
        let parent = path.frame_mut(depth - 1).ok_or_else(empty_path)?;
        let parent_id = parent.entry.id;
        let slot = parent
            .node
            .children_mut()
            .and_then(|children| children.get_mut(idx))
            .ok_or_else(|| {
                PageTreeError::invariant(&format!(
                    "child position {} out of range in node {}",
                    idx, parent_id
                ))
            })?;
        if !slot.descriptor.contains(&entry.descriptor) {
            slot.descriptor = entry.descriptor.clone();
            parent.dirty = true;
        }
        if !parent.entry.descriptor.contains(&entry.descriptor) {
            parent.entry.descriptor.union(&entry.descriptor);
        }
    }
    Ok(())
}

/// Puts an item into the node on its level.
pub(crate) fn grow<S: NodeOps>(
    ops: &S,
    node: &mut NodeOf<S>,
    item: Item<S::Entry, S::Desc>,
) -> PageTreeResult<()> {
    match (node, item) {
        (Node::Leaf { entries }, Item::Data(entry)) => {
            ops.grow_leaf(entries, entry);
            Ok(())
        }
        (Node::Internal { children, level }, Item::Index(mut entry)) => {
            entry.parent_level = *level;
            ops.grow_index(children, entry);
            Ok(())
        }
        (node, item) => Err(PageTreeError::invariant(&format!(
            "item for level {} does not fit a node on level {}",
            item.level(),
            node.level()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{BlockFileConfig, BlockFileContainer};
    use crate::descriptor::KeyRange;
    use crate::tree::test_support::{init_logger, int_tree, IntOps};
    use crate::tree::Capacity;
    use rand::seq::SliceRandom;
    use tempfile::tempdir;

    #[test]
    fn test_first_insert_plants_leaf_root() {
        let tree = int_tree(2, 4);
        tree.insert(7).unwrap();

        let root = tree.root().unwrap();
        assert_eq!(tree.height(), 1);
        assert_eq!(root.parent_level, 1);
        assert_eq!(root.descriptor, KeyRange::point(7));
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_root_split_grows_height() {
        let tree = int_tree(2, 4);
        for key in 1..=5 {
            tree.insert(key).unwrap();
        }
        assert_eq!(tree.height(), 2);
        let root = tree.root().unwrap();
        let node = tree.container().get(root.id, true).unwrap();
        assert_eq!(node.len(), 2);
        assert_eq!(root.descriptor, KeyRange::new(1, 5));
    }

    #[test]
    fn test_random_inserts_keep_tree_consistent() {
        init_logger();
        let tree = int_tree(2, 4);
        let mut keys: Vec<u32> = (1..=500).collect();
        keys.shuffle(&mut rand::thread_rng());
        for key in &keys {
            tree.insert(*key).unwrap();
        }

        let report = tree.check().unwrap();
        assert_eq!(report.entries, 500);
        assert!(report.height >= 4);
        assert_eq!(tree.container().fixed_count(), 0);
    }

    #[test]
    fn test_insert_index_item_above_root_wraps_root() {
        let tree = int_tree(2, 4);
        tree.insert(1).unwrap();
        tree.insert(2).unwrap();

        // a separate leaf referenced from level 2 forces a new root on level 2
        let leaf = Node::leaf(vec![10, 11]);
        let id = tree.container().insert(&leaf).unwrap();
        tree.insert_item(Item::Index(IndexEntry::new(id, KeyRange::new(10, 11), 1)))
            .unwrap();

        assert_eq!(tree.height(), 2);
        assert_eq!(tree.root().unwrap().descriptor, KeyRange::new(1, 11));
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn test_mismatched_item_is_invariant_violation() {
        let mut node: NodeOf<IntOps> = Node::leaf(vec![1]);
        let err = grow(
            &IntOps,
            &mut node,
            Item::Index(IndexEntry::new(3, KeyRange::point(1), 1)),
        )
        .unwrap_err();
        assert_eq!(err.kind(), &crate::errors::ErrorKind::InvariantViolation);
    }

    #[test]
    fn test_flush_and_open_restore_tree() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tree.db");
        {
            let container: BlockFileContainer<NodeOf<IntOps>> =
                BlockFileContainer::create(&path, BlockFileConfig::default()).unwrap();
            let tree = Tree::new(IntOps, container, Capacity::new(2, 4).unwrap());
            for key in 0..50 {
                tree.insert(key).unwrap();
            }
            tree.flush().unwrap();
        }

        let container: BlockFileContainer<NodeOf<IntOps>> =
            BlockFileContainer::open(&path, 16).unwrap();
        let tree = Tree::open(IntOps, container, Capacity::new(2, 4).unwrap()).unwrap();
        assert_eq!(tree.len(), 50);
        assert_eq!(tree.check().unwrap().entries, 50);
        let found: Vec<u32> = tree
            .query(crate::tree::Overlaps(KeyRange::new(10, 12)), 0)
            .entries()
            .collect::<PageTreeResult<_>>()
            .unwrap();
        assert_eq!(found.len(), 3);
    }
}
