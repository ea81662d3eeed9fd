use serde::{Deserialize, Serialize};

use crate::container::PageId;

/// Reference from a non-leaf node to a child node.
///
/// The entry owns no node: `id` is resolved through the container on every
/// access. `descriptor` covers every entry reachable in the child's subtree and
/// `parent_level` is the level of the node holding this entry (the child sits
/// one level below).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry<D> {
    pub id: PageId,
    pub descriptor: D,
    pub parent_level: u32,
}

impl<D> IndexEntry<D> {
    pub fn new(id: PageId, descriptor: D, parent_level: u32) -> Self {
        Self {
            id,
            descriptor,
            parent_level,
        }
    }

    /// Level of the referenced node.
    pub fn child_level(&self) -> u32 {
        self.parent_level.saturating_sub(1)
    }
}

/// A tree page: data entries at level 0, index entries above.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node<E, D> {
    /// Leaf node containing data entries
    Leaf { entries: Vec<E> },
    /// Internal node containing child references
    Internal {
        children: Vec<IndexEntry<D>>,
        level: u32, // height from leaf level (leaves are 0)
    },
}

impl<E, D> Node<E, D> {
    pub fn leaf(entries: Vec<E>) -> Self {
        Node::Leaf { entries }
    }

    pub fn internal(children: Vec<IndexEntry<D>>, level: u32) -> Self {
        Node::Internal { children, level }
    }

    pub fn level(&self) -> u32 {
        match self {
            Node::Leaf { .. } => 0,
            Node::Internal { level, .. } => *level,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf { .. })
    }

    pub fn len(&self) -> usize {
        match self {
            Node::Leaf { entries } => entries.len(),
            Node::Internal { children, .. } => children.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entries(&self) -> &[E] {
        match self {
            Node::Leaf { entries } => entries,
            Node::Internal { .. } => &[],
        }
    }

    pub fn children(&self) -> &[IndexEntry<D>] {
        match self {
            Node::Leaf { .. } => &[],
            Node::Internal { children, .. } => children,
        }
    }

    pub fn children_mut(&mut self) -> Option<&mut Vec<IndexEntry<D>>> {
        match self {
            Node::Leaf { .. } => None,
            Node::Internal { children, .. } => Some(children),
        }
    }

    pub fn entries_mut(&mut self) -> Option<&mut Vec<E>> {
        match self {
            Node::Leaf { entries } => Some(entries),
            Node::Internal { .. } => None,
        }
    }

    /// Empty node of the same kind and level.
    pub fn empty_like(&self) -> Self {
        match self {
            Node::Leaf { .. } => Node::Leaf {
                entries: Vec::new(),
            },
            Node::Internal { level, .. } => Node::Internal {
                children: Vec::new(),
                level: *level,
            },
        }
    }
}

/// Something that can be placed into a node: a data entry into a leaf or an
/// index entry into a node at `parent_level`.
#[derive(Debug, Clone, PartialEq)]
pub enum Item<E, D> {
    Data(E),
    Index(IndexEntry<D>),
}

impl<E, D> Item<E, D> {
    /// Level of the node that holds this item.
    pub fn level(&self) -> u32 {
        match self {
            Item::Data(_) => 0,
            Item::Index(entry) => entry.parent_level,
        }
    }

    pub fn into_data(self) -> Option<E> {
        match self {
            Item::Data(entry) => Some(entry),
            Item::Index(_) => None,
        }
    }

    pub fn into_index(self) -> Option<IndexEntry<D>> {
        match self {
            Item::Data(_) => None,
            Item::Index(entry) => Some(entry),
        }
    }
}

/// Drains a node into the items it holds.
pub fn into_items<E, D>(node: Node<E, D>) -> Vec<Item<E, D>> {
    match node {
        Node::Leaf { entries } => entries.into_iter().map(Item::Data).collect(),
        Node::Internal { children, .. } => children.into_iter().map(Item::Index).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_levels_and_len() {
        let leaf: Node<u32, ()> = Node::leaf(vec![1, 2, 3]);
        assert!(leaf.is_leaf());
        assert_eq!(leaf.level(), 0);
        assert_eq!(leaf.len(), 3);
        assert!(leaf.children().is_empty());

        let inner: Node<u32, ()> = Node::internal(vec![IndexEntry::new(4, (), 2)], 2);
        assert!(!inner.is_leaf());
        assert_eq!(inner.level(), 2);
        assert_eq!(inner.children()[0].child_level(), 1);
        assert!(inner.entries().is_empty());
    }

    #[test]
    fn test_empty_like_keeps_level() {
        let inner: Node<u32, ()> = Node::internal(vec![IndexEntry::new(1, (), 3)], 3);
        let empty = inner.empty_like();
        assert_eq!(empty.level(), 3);
        assert!(empty.is_empty());
    }

    #[test]
    fn test_into_items() {
        let inner: Node<u32, u8> =
            Node::internal(vec![IndexEntry::new(1, 7, 1), IndexEntry::new(2, 8, 1)], 1);
        let items = into_items(inner);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].level(), 1);
        assert_eq!(items[1].clone().into_index().unwrap().id, 2);
        assert_eq!(Item::<u32, u8>::Data(5).level(), 0);
    }
}
