use std::marker::PhantomData;
use std::ops::{Bound, RangeBounds};

use super::{BTreeKey, BTreeValue};
use crate::descriptor::KeyRange;
use crate::errors::{PageTreeError, PageTreeResult};
use crate::tree::{IndexEntry, Node, NodeOps, Partition, QueryFilter, SplitBounds};

/// Node operations of the B+-tree: sorted leaves, key-ordered index nodes.
pub struct BPlusOps<K, V> {
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> BPlusOps<K, V> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<K, V> Default for BPlusOps<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Splits a sorted sequence in the middle, within the legal sizes.
fn split_middle<T>(mut items: Vec<T>, bounds: SplitBounds) -> Partition<T> {
    let first = (items.len() / 2).clamp(bounds.min, bounds.max);
    let second = items.split_off(first);
    (items, second)
}

impl<K: BTreeKey, V: BTreeValue> NodeOps for BPlusOps<K, V> {
    type Entry = (K, V);
    type Desc = KeyRange<K>;

    fn descriptor(&self, entry: &(K, V)) -> KeyRange<K> {
        KeyRange::point(entry.0.clone())
    }

    // first child whose range reaches the key, the last one for keys beyond all
    fn choose_subtree(
        &self,
        children: &[IndexEntry<KeyRange<K>>],
        desc: &KeyRange<K>,
        _level: u32,
    ) -> usize {
        children
            .iter()
            .position(|child| child.descriptor.max >= desc.min)
            .unwrap_or(children.len().saturating_sub(1))
    }

    fn grow_leaf(&self, entries: &mut Vec<(K, V)>, entry: (K, V)) {
        let pos = entries.partition_point(|e| e.0 <= entry.0);
        entries.insert(pos, entry);
    }

    fn grow_index(
        &self,
        children: &mut Vec<IndexEntry<KeyRange<K>>>,
        child: IndexEntry<KeyRange<K>>,
    ) {
        let key = (&child.descriptor.min, &child.descriptor.max);
        let pos = children.partition_point(|c| (&c.descriptor.min, &c.descriptor.max) <= key);
        children.insert(pos, child);
    }

    fn split_leaf(
        &self,
        entries: Vec<(K, V)>,
        bounds: SplitBounds,
    ) -> PageTreeResult<Partition<(K, V)>> {
        Ok(split_middle(entries, bounds))
    }

    fn split_index(
        &self,
        children: Vec<IndexEntry<KeyRange<K>>>,
        bounds: SplitBounds,
    ) -> PageTreeResult<Partition<IndexEntry<KeyRange<K>>>> {
        Ok(split_middle(children, bounds))
    }

    fn check_node(
        &self,
        node: &Node<(K, V), KeyRange<K>>,
        _descriptor: &KeyRange<K>,
    ) -> PageTreeResult<()> {
        match node {
            Node::Leaf { entries } => {
                if entries.windows(2).any(|w| w[0].0 > w[1].0) {
                    return Err(PageTreeError::invariant("leaf entries are not sorted"));
                }
            }
            Node::Internal { children, level } => {
                if children
                    .windows(2)
                    .any(|w| w[0].descriptor.max > w[1].descriptor.min)
                {
                    return Err(PageTreeError::invariant(&format!(
                        "key ranges of the children of a level {} node overlap",
                        level
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Query filter for an arbitrary key range (`a..b`, `a..=b`, `..`).
#[derive(Debug, Clone)]
pub struct KeyBounds<K> {
    start: Bound<K>,
    end: Bound<K>,
}

impl<K: Clone> KeyBounds<K> {
    pub fn new<R: RangeBounds<K>>(range: R) -> Self {
        Self {
            start: range.start_bound().cloned(),
            end: range.end_bound().cloned(),
        }
    }
}

impl<K: Ord> KeyBounds<K> {
    pub fn after_start(&self, key: &K) -> bool {
        match &self.start {
            Bound::Included(start) => key >= start,
            Bound::Excluded(start) => key > start,
            Bound::Unbounded => true,
        }
    }

    pub fn before_end(&self, key: &K) -> bool {
        match &self.end {
            Bound::Included(end) => key <= end,
            Bound::Excluded(end) => key < end,
            Bound::Unbounded => true,
        }
    }

    /// Whether the range starts strictly below `key`.
    pub fn starts_below(&self, key: &K) -> bool {
        match &self.start {
            Bound::Included(start) | Bound::Excluded(start) => start < key,
            Bound::Unbounded => true,
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.after_start(key) && self.before_end(key)
    }
}

impl<K: Ord> QueryFilter<KeyRange<K>> for KeyBounds<K> {
    type Context = ();

    fn enter(&self, _node: &KeyRange<K>) {}

    fn index(&self, _ctx: &(), child: &KeyRange<K>) -> bool {
        self.after_start(&child.max) && self.before_end(&child.min)
    }
}
