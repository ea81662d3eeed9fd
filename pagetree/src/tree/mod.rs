//! The generic paginated tree.
//!
//! - [`Node`], [`IndexEntry`] and [`Item`]: what a page holds
//! - [`Capacity`]: per-level overflow and underflow policy
//! - [`NodeOps`]: the variant-specific behaviour (descriptor, subtree choice, split)
//! - [`Path`]: explicit root-to-node stack used by every mutation
//! - [`Tree`]: grow/split/post insertion, removal with underflow repair,
//!   bulk loading and the consistency check
//! - [`Cursor`] and [`BestFirst`]: lazy level-synchronised and priority-driven queries

mod best_first;
mod bulk;
mod capacity;
mod cursor;
mod engine;
mod node;
mod ops;
mod ortree;
mod path;

pub use best_first::{BestFirst, Candidate};
pub use capacity::{encoded_size, Bounds, Capacity, SplitBounds, NODE_HEADER_BYTES};
pub use cursor::{All, Cursor, Overlaps, QueryFilter};
pub use engine::{NodeOf, Tree, TreeMeta};
pub use node::{into_items, IndexEntry, Item, Node};
pub use ops::{check_partition, split_sorted_by, NodeOps, Partition};
pub use ortree::TreeReport;
pub use path::{Frame, Path};

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::container::MemoryContainer;
    use crate::descriptor::KeyRange;
    use crate::errors::PageTreeResult;

    /// Integer keys with interval descriptors.
    pub struct IntOps;

    impl NodeOps for IntOps {
        type Entry = u32;
        type Desc = KeyRange<u32>;

        fn descriptor(&self, entry: &u32) -> KeyRange<u32> {
            KeyRange::point(*entry)
        }

        fn choose_subtree(
            &self,
            children: &[IndexEntry<KeyRange<u32>>],
            desc: &KeyRange<u32>,
            _level: u32,
        ) -> usize {
            let enlargement = |range: &KeyRange<u32>| {
                let min = range.min.min(desc.min);
                let max = range.max.max(desc.max);
                (max - min) - (range.max - range.min)
            };
            children
                .iter()
                .enumerate()
                .min_by_key(|(_, child)| enlargement(&child.descriptor))
                .map(|(idx, _)| idx)
                .unwrap_or(0)
        }

        fn split_leaf(
            &self,
            entries: Vec<u32>,
            bounds: SplitBounds,
        ) -> PageTreeResult<Partition<u32>> {
            let first = (entries.len() / 2).clamp(bounds.min, bounds.max);
            Ok(split_sorted_by(entries, first, |e| *e))
        }

        fn split_index(
            &self,
            children: Vec<IndexEntry<KeyRange<u32>>>,
            bounds: SplitBounds,
        ) -> PageTreeResult<Partition<IndexEntry<KeyRange<u32>>>> {
            let first = (children.len() / 2).clamp(bounds.min, bounds.max);
            Ok(split_sorted_by(children, first, |c| c.descriptor.min))
        }
    }

    pub type IntTree = Tree<IntOps, MemoryContainer<NodeOf<IntOps>>>;

    pub fn int_tree(min: usize, max: usize) -> IntTree {
        Tree::new(IntOps, MemoryContainer::new(), Capacity::new(min, max).unwrap())
    }

    pub fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }
}
