use itertools::Itertools;

use super::engine::{NodeOf, Tree};
use super::node::{IndexEntry, Item, Node};
use super::ops::NodeOps;
use crate::container::Container;
use crate::errors::{ErrorKind, PageTreeError, PageTreeResult};

impl<S, C> Tree<S, C>
where
    S: NodeOps,
    C: Container<NodeOf<S>>,
{
    /// Builds the tree bottom-up from `entries`, taken in the given order.
    ///
    /// Every level is packed into full nodes; a trailing node that would fall
    /// below the minimum capacity shares the entries of its left neighbour.
    /// Only an empty tree can be bulk loaded.
    pub fn bulk_load(&self, entries: Vec<S::Entry>) -> PageTreeResult<()> {
        let mut meta = self.meta.write();
        if meta.root.is_some() {
            return Err(PageTreeError::new(
                "bulk loading requires an empty tree",
                ErrorKind::InvalidOperation,
            ));
        }
        if entries.is_empty() {
            return Ok(());
        }

        let len = entries.len() as u64;
        let mut items: Vec<Item<S::Entry, S::Desc>> = entries.into_iter().map(Item::Data).collect();
        let mut level = 0u32;
        let root = loop {
            let groups = self.pack(level, items);
            let mut parents = Vec::with_capacity(groups.len());
            for group in groups {
                let mut node = node_from_items(level, group)?;
                let desc = self
                    .ops
                    .compute_descriptor(&node)
                    .ok_or_else(|| PageTreeError::invariant("bulk loading produced an empty node"))?;
                self.ops.normalize(&mut node, &desc);
                let id = self.container.insert(&node)?;
                parents.push(IndexEntry::new(id, desc, level + 1));
            }
            log::debug!("bulk loaded {} nodes on level {}", parents.len(), level);

            if parents.len() == 1 {
                break parents.pop();
            }
            items = parents.into_iter().map(Item::Index).collect();
            level += 1;
        };

        meta.height = level + 1;
        meta.root = root;
        meta.len = len;
        Ok(())
    }

    /// Cuts one level into node-sized groups.
    fn pack<T>(&self, level: u32, items: Vec<T>) -> Vec<Vec<T>> {
        let bounds = *self.capacity.bounds(level);
        let chunks = items.into_iter().chunks(bounds.max);
        let mut groups: Vec<Vec<T>> = Vec::new();
        for chunk in &chunks {
            groups.push(chunk.collect());
        }

        let short = groups.len() > 1 && groups.last().is_some_and(|g| g.len() < bounds.min);
        if short {
            if let (Some(last), Some(mut prev)) = (groups.pop(), groups.pop()) {
                prev.extend(last);
                let second = prev.split_off(prev.len().div_ceil(2));
                groups.push(prev);
                groups.push(second);
            }
        }
        groups
    }
}

fn node_from_items<E, D>(level: u32, items: Vec<Item<E, D>>) -> PageTreeResult<Node<E, D>> {
    if level == 0 {
        let entries = items
            .into_iter()
            .map(|item| {
                item.into_data()
                    .ok_or_else(|| PageTreeError::invariant("index entry on the leaf level"))
            })
            .collect::<PageTreeResult<Vec<_>>>()?;
        Ok(Node::leaf(entries))
    } else {
        let children = items
            .into_iter()
            .map(|item| {
                item.into_index()
                    .ok_or_else(|| PageTreeError::invariant("data entry above the leaf level"))
            })
            .collect::<PageTreeResult<Vec<_>>>()?;
        Ok(Node::internal(children, level))
    }
}
