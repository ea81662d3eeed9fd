use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::capacity::SplitBounds;
use super::node::{IndexEntry, Node};
use crate::descriptor::{union_all, Descriptor};
use crate::errors::{PageTreeError, PageTreeResult};

/// Two partitions produced by a split: the first stays in the split node, the
/// second moves into a new node.
pub type Partition<T> = (Vec<T>, Vec<T>);

/// Variant-specific node behaviour plugged into the generic [`Tree`](super::Tree).
///
/// A tree variant is a type implementing this trait; the engine drives
/// insertion, splitting, removal and queries through it and never inspects
/// entries or descriptors directly.
pub trait NodeOps: Send + Sync {
    /// Data entry stored in leaves.
    type Entry: Clone + Debug + Serialize + DeserializeOwned + Send + Sync;
    /// Region descriptor stored in index entries.
    type Desc: Descriptor + Send + Sync;

    /// Descriptor of a single data entry.
    fn descriptor(&self, entry: &Self::Entry) -> Self::Desc;

    /// Index of the child that should receive an item with descriptor `desc`.
    /// `children` is never empty; `level` is the level of the node holding them.
    fn choose_subtree(
        &self,
        children: &[IndexEntry<Self::Desc>],
        desc: &Self::Desc,
        level: u32,
    ) -> usize;

    /// Puts a data entry into a leaf.
    fn grow_leaf(&self, entries: &mut Vec<Self::Entry>, entry: Self::Entry) {
        entries.push(entry);
    }

    /// Puts an index entry into an internal node.
    fn grow_index(
        &self,
        children: &mut Vec<IndexEntry<Self::Desc>>,
        child: IndexEntry<Self::Desc>,
    ) {
        children.push(child);
    }

    /// Splits the entries of an overflowing leaf. The size of the first
    /// partition must be accepted by `bounds`.
    fn split_leaf(
        &self,
        entries: Vec<Self::Entry>,
        bounds: SplitBounds,
    ) -> PageTreeResult<Partition<Self::Entry>>;

    /// Splits the children of an overflowing internal node.
    fn split_index(
        &self,
        children: Vec<IndexEntry<Self::Desc>>,
        bounds: SplitBounds,
    ) -> PageTreeResult<Partition<IndexEntry<Self::Desc>>>;

    /// Descriptor of a whole node; `None` for an empty node.
    fn compute_descriptor(&self, node: &Node<Self::Entry, Self::Desc>) -> Option<Self::Desc> {
        match node {
            Node::Leaf { entries } => {
                let descriptors: Vec<_> = entries.iter().map(|e| self.descriptor(e)).collect();
                union_all(&descriptors)
            }
            Node::Internal { children, .. } => union_all(children.iter().map(|c| &c.descriptor)),
        }
    }

    /// Brings a node into normal form relative to the descriptor its parent
    /// entry holds for it. Called after an item is grown into the node and
    /// before a modified node is written or split.
    fn normalize(&self, _node: &mut Node<Self::Entry, Self::Desc>, _descriptor: &Self::Desc) {}

    /// Variant-specific consistency check of one node.
    fn check_node(
        &self,
        _node: &Node<Self::Entry, Self::Desc>,
        _descriptor: &Self::Desc,
    ) -> PageTreeResult<()> {
        Ok(())
    }
}

/// Fails with an invariant violation if a split produced an illegal partition.
pub fn check_partition<T>(partition: &Partition<T>, bounds: SplitBounds) -> PageTreeResult<()> {
    let total = partition.0.len() + partition.1.len();
    if !bounds.accepts(partition.0.len(), total) || partition.1.is_empty() {
        return Err(PageTreeError::invariant(&format!(
            "split produced partitions of {} and {} entries (first must be within [{}, {}])",
            partition.0.len(),
            partition.1.len(),
            bounds.min,
            bounds.max
        )));
    }
    Ok(())
}

/// Splits `items` at `first` after sorting them with `key`.
pub fn split_sorted_by<T, K, F>(mut items: Vec<T>, first: usize, key: F) -> Partition<T>
where
    F: FnMut(&T) -> K,
    K: Ord,
{
    items.sort_by_key(key);
    let second = items.split_off(first.min(items.len()));
    (items, second)
}
