use std::ops::RangeBounds;

use super::ops::{BPlusOps, KeyBounds};
use super::{BTreeKey, BTreeValue};
use crate::container::Container;
use crate::descriptor::KeyRange;
use crate::errors::{ErrorKind, PageTreeError, PageTreeResult};
use crate::tree::{encoded_size, Capacity, IndexEntry, Node, NodeOf, Tree, TreeReport};

/// Order of the input of [`BPlusTree::bulk_load`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Ordered multimap stored in a container.
///
/// # Examples
///
/// ```rust
/// use pagetree::btree::BPlusTree;
/// use pagetree::container::MemoryContainer;
/// use pagetree::tree::Capacity;
///
/// let tree = BPlusTree::new(MemoryContainer::new(), Capacity::new(2, 4).unwrap());
/// tree.insert("b".to_string(), 2).unwrap();
/// tree.insert("a".to_string(), 1).unwrap();
/// assert_eq!(tree.first().unwrap(), Some(("a".to_string(), 1)));
/// ```
pub struct BPlusTree<K: BTreeKey, V: BTreeValue, C> {
    tree: Tree<BPlusOps<K, V>, C>,
}

impl<K, V, C> BPlusTree<K, V, C>
where
    K: BTreeKey,
    V: BTreeValue,
    C: Container<NodeOf<BPlusOps<K, V>>>,
{
    /// Creates an empty tree in `container`.
    pub fn new(container: C, capacity: Capacity) -> Self {
        Self {
            tree: Tree::new(BPlusOps::new(), container, capacity),
        }
    }

    /// Opens the tree persisted in `container` by an earlier [`flush`](Self::flush).
    pub fn open(container: C, capacity: Capacity) -> PageTreeResult<Self> {
        Ok(Self {
            tree: Tree::open(BPlusOps::new(), container, capacity)?,
        })
    }

    /// Capacity fitting entries shaped like `sample` into blocks of
    /// `block_size` bytes.
    pub fn capacity_for(
        block_size: usize,
        sample: &(K, V),
        min_ratio: f64,
    ) -> PageTreeResult<Capacity> {
        let leaf_bytes = encoded_size(sample)?;
        let index_bytes = encoded_size(&IndexEntry::new(
            u64::MAX,
            KeyRange::point(sample.0.clone()),
            u32::MAX,
        ))?;
        Capacity::from_block_size(block_size, leaf_bytes, index_bytes, min_ratio)
    }

    /// The underlying engine.
    pub fn engine(&self) -> &Tree<BPlusOps<K, V>, C> {
        &self.tree
    }

    pub fn container(&self) -> &C {
        self.tree.container()
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

    pub fn insert(&self, key: K, value: V) -> PageTreeResult<()> {
        self.tree.insert((key, value))
    }

    /// Value of the first entry with `key`.
    pub fn get(&self, key: &K) -> PageTreeResult<Option<V>> {
        self.range(key.clone()..=key.clone())
            .next()
            .transpose()
            .map(|found| found.map(|(_, v)| v))
    }

    /// Values of all entries with `key`.
    pub fn get_all(&self, key: &K) -> PageTreeResult<Vec<V>> {
        self.range(key.clone()..=key.clone())
            .map(|entry| entry.map(|(_, v)| v))
            .collect()
    }

    pub fn contains_key(&self, key: &K) -> PageTreeResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Removes the first entry with `key` and returns its value.
    pub fn remove(&self, key: &K) -> PageTreeResult<Option<V>> {
        let removed = self
            .tree
            .remove(&KeyRange::point(key.clone()), |(k, _)| k == key)?;
        Ok(removed.map(|(_, v)| v))
    }

    /// Removes the entry `(key, value)`. Returns whether it was present.
    pub fn remove_entry(&self, key: &K, value: &V) -> PageTreeResult<bool>
    where
        V: PartialEq,
    {
        let removed = self
            .tree
            .remove(&KeyRange::point(key.clone()), |(k, v)| k == key && v == value)?;
        Ok(removed.is_some())
    }

    /// Entries with keys in `range`, ascending. Lazy: only the leaves that
    /// intersect the range are read, one at a time.
    pub fn range<R>(&self, range: R) -> impl Iterator<Item = PageTreeResult<(K, V)>> + '_
    where
        R: RangeBounds<K>,
    {
        self.tree.query(KeyBounds::new(range), 0).entries()
    }

    /// All entries, ascending.
    pub fn iter(&self) -> impl Iterator<Item = PageTreeResult<(K, V)>> + '_ {
        self.range(..)
    }

    pub fn first(&self) -> PageTreeResult<Option<(K, V)>> {
        self.iter().next().transpose()
    }

    pub fn last(&self) -> PageTreeResult<Option<(K, V)>> {
        let mut entry = match self.tree.root() {
            Some(root) => root,
            None => return Ok(None),
        };
        loop {
            match self.tree.container().get(entry.id, true)? {
                Node::Leaf { entries } => return Ok(entries.last().cloned()),
                Node::Internal { children, .. } => match children.last() {
                    Some(child) => entry = child.clone(),
                    None => return Ok(None),
                },
            }
        }
    }

    /// Builds an empty tree from sorted entries.
    pub fn bulk_load(&self, mut entries: Vec<(K, V)>, order: SortOrder) -> PageTreeResult<()> {
        let sorted = match order {
            SortOrder::Ascending => entries.windows(2).all(|w| w[0].0 <= w[1].0),
            SortOrder::Descending => entries.windows(2).all(|w| w[0].0 >= w[1].0),
        };
        if !sorted {
            return Err(PageTreeError::new(
                &format!("bulk load input is not sorted in {:?} order", order),
                ErrorKind::InvalidOperation,
            ));
        }
        if order == SortOrder::Descending {
            entries.reverse();
        }
        self.tree.bulk_load(entries)
    }

    pub fn check(&self) -> PageTreeResult<TreeReport> {
        self.tree.check()
    }

    pub fn flush(&self) -> PageTreeResult<()> {
        self.tree.flush()
    }
}
