use std::marker::PhantomData;

use pagetree::descriptor::Descriptor;
use pagetree::errors::{PageTreeError, PageTreeResult};
use pagetree::tree::{IndexEntry, Node, NodeOps, Partition, QueryFilter, SplitBounds};

use super::split::SplitStrategy;
use crate::SpatialValue;
use crate::rectangle::Rectangle;

/// Node operations of the R-tree: `(rectangle, value)` leaf entries,
/// bounding rectangles on index entries, a configurable split.
pub struct RTreeOps<T> {
    split: SplitStrategy,
    _values: PhantomData<fn() -> T>,
}

impl<T> RTreeOps<T> {
    pub fn new(split: SplitStrategy) -> Self {
        Self {
            split,
            _values: PhantomData,
        }
    }

    pub fn split_strategy(&self) -> SplitStrategy {
        self.split
    }
}

/// Index of the child that should receive `rect`.
///
/// A child already containing the rectangle wins (smallest area first);
/// otherwise the least area enlargement, ties broken by smaller area. The
/// first candidate wins remaining ties.
pub fn choose_child(children: &[IndexEntry<Rectangle>], rect: &Rectangle) -> usize {
    let containing = children
        .iter()
        .enumerate()
        .filter(|(_, child)| child.descriptor.contains(rect))
        .min_by(|(_, a), (_, b)| a.descriptor.area().total_cmp(&b.descriptor.area()))
        .map(|(idx, _)| idx);
    if let Some(idx) = containing {
        return idx;
    }

    let mut best = 0;
    let mut best_key = (f64::INFINITY, f64::INFINITY);
    for (idx, child) in children.iter().enumerate() {
        let key = (child.descriptor.enlargement(rect), child.descriptor.area());
        if key.0 < best_key.0 || (key.0 == best_key.0 && key.1 < best_key.1) {
            best_key = key;
            best = idx;
        }
    }
    best
}

impl<T: SpatialValue> NodeOps for RTreeOps<T> {
    type Entry = (Rectangle, T);
    type Desc = Rectangle;

    fn descriptor(&self, entry: &(Rectangle, T)) -> Rectangle {
        entry.0.clone()
    }

    fn choose_subtree(
        &self,
        children: &[IndexEntry<Rectangle>],
        desc: &Rectangle,
        _level: u32,
    ) -> usize {
        choose_child(children, desc)
    }

    fn split_leaf(
        &self,
        entries: Vec<(Rectangle, T)>,
        bounds: SplitBounds,
    ) -> PageTreeResult<Partition<(Rectangle, T)>> {
        Ok(self.split.split(entries, bounds, |e| &e.0))
    }

    fn split_index(
        &self,
        children: Vec<IndexEntry<Rectangle>>,
        bounds: SplitBounds,
    ) -> PageTreeResult<Partition<IndexEntry<Rectangle>>> {
        Ok(self.split.split(children, bounds, |c| &c.descriptor))
    }

    fn check_node(
        &self,
        node: &Node<(Rectangle, T), Rectangle>,
        descriptor: &Rectangle,
    ) -> PageTreeResult<()> {
        let dims = descriptor.dims();
        let mismatch = match node {
            Node::Leaf { entries } => entries.iter().map(|e| e.0.dims()).find(|d| *d != dims),
            Node::Internal { children, .. } => children
                .iter()
                .map(|c| c.descriptor.dims())
                .find(|d| *d != dims),
        };
        match mismatch {
            Some(found) => Err(PageTreeError::invariant(&format!(
                "node on level {} mixes {}- and {}-dimensional rectangles",
                node.level(),
                dims,
                found
            ))),
            None => Ok(()),
        }
    }
}

/// Query filter yielding entries whose rectangle lies inside the query
/// rectangle. Subtrees are visited when they overlap it.
#[derive(Debug, Clone)]
pub struct ContainedIn(pub Rectangle);

impl QueryFilter<Rectangle> for ContainedIn {
    type Context = ();

    fn enter(&self, _node: &Rectangle) {}

    fn index(&self, _ctx: &(), child: &Rectangle) -> bool {
        child.overlaps(&self.0)
    }

    fn leaf(&self, _ctx: &(), entry: &Rectangle) -> bool {
        self.0.contains(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn child(id: u64, rect: Rectangle) -> IndexEntry<Rectangle> {
        IndexEntry::new(id, rect, 1)
    }

    #[test]
    fn test_choose_child_prefers_containing_then_enlargement() {
        let children = vec![
            child(1, Rectangle::new_2d(0.0, 0.0, 10.0, 10.0)),
            child(2, Rectangle::new_2d(2.0, 2.0, 4.0, 4.0)),
            child(3, Rectangle::new_2d(20.0, 20.0, 30.0, 30.0)),
        ];
        // both 1 and 2 contain it; 2 is smaller
        assert_eq!(choose_child(&children, &Rectangle::point(&[3.0, 3.0])), 1);
        // only 1 contains it
        assert_eq!(choose_child(&children, &Rectangle::point(&[8.0, 8.0])), 0);
        // nobody contains it; 3 needs the least enlargement
        assert_eq!(choose_child(&children, &Rectangle::point(&[31.0, 31.0])), 2);
    }

    #[test]
    fn test_choose_child_area_tie_break() {
        let children = vec![
            child(1, Rectangle::new_2d(0.0, 0.0, 4.0, 4.0)),
            child(2, Rectangle::new_2d(10.0, 0.0, 12.0, 2.0)),
        ];
        // equal enlargement (8.0 each), the smaller child wins
        let rect = Rectangle::point(&[6.0, 1.0]);
        assert_eq!(
            children[0].descriptor.enlargement(&rect),
            children[1].descriptor.enlargement(&rect)
        );
        assert_eq!(choose_child(&children, &rect), 1);
    }

    #[test]
    fn test_contained_in_filter() {
        let filter = ContainedIn(Rectangle::new_2d(0.0, 0.0, 10.0, 10.0));
        assert!(filter.index(&(), &Rectangle::new_2d(5.0, 5.0, 20.0, 20.0)));
        assert!(!filter.leaf(&(), &Rectangle::new_2d(5.0, 5.0, 20.0, 20.0)));
        assert!(filter.leaf(&(), &Rectangle::new_2d(1.0, 1.0, 2.0, 2.0)));
    }
}
