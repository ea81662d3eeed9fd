//! Overlapping-region layer: removal with underflow repair, update and the
//! consistency check.
//!
//! Removal is query-then-remove. The leaf holding the first entry that
//! overlaps the search descriptor and satisfies the equality predicate is
//! located with an explicit path stack, the entry is taken out and the path is
//! condensed bottom-up: underflowing nodes are dissolved and their items are
//! re-inserted at their own level, the remaining ancestors get tight
//! descriptors, and a root left with a single child is replaced by it.

use std::cmp::Reverse;

use super::cursor::Overlaps;
use super::engine::{empty_path, top, NodeOf, Tree, TreeMeta};
use super::node::{into_items, IndexEntry, Item, Node};
use super::ops::NodeOps;
use super::path::Path;
use crate::container::Container;
use crate::descriptor::Descriptor;
use crate::errors::{PageTreeError, PageTreeResult};

/// Outcome of [`Tree::check`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TreeReport {
    pub height: u32,
    /// Number of nodes per level, leaves first
    pub nodes_per_level: Vec<usize>,
    /// Number of data entries found in leaves
    pub entries: u64,
}

impl TreeReport {
    pub fn nodes(&self) -> usize {
        self.nodes_per_level.iter().sum()
    }
}

impl<S, C> Tree<S, C>
where
    S: NodeOps,
    C: Container<NodeOf<S>>,
{
    /// Returns the first entry overlapping `desc` that satisfies `pred`.
    pub fn find<P>(&self, desc: &S::Desc, pred: P) -> PageTreeResult<Option<S::Entry>>
    where
        P: Fn(&S::Entry) -> bool,
    {
        for entry in self.query(Overlaps(desc.clone()), 0).entries() {
            let entry = entry?;
            if pred(&entry) {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    /// Removes the first entry overlapping `desc` that satisfies `pred` and
    /// returns it.
    pub fn remove<P>(&self, desc: &S::Desc, pred: P) -> PageTreeResult<Option<S::Entry>>
    where
        P: Fn(&S::Entry) -> bool,
    {
        let mut meta = self.meta.write();
        self.remove_locked(&mut meta, desc, &pred)
    }

    /// Replaces the first entry overlapping `desc` that satisfies `pred` with
    /// `entry`. Returns the replaced entry; nothing is inserted when no entry
    /// matches.
    pub fn update<P>(
        &self,
        desc: &S::Desc,
        pred: P,
        entry: S::Entry,
    ) -> PageTreeResult<Option<S::Entry>>
    where
        P: Fn(&S::Entry) -> bool,
    {
        let mut meta = self.meta.write();
        let old = self.remove_locked(&mut meta, desc, &pred)?;
        if old.is_some() {
            self.insert_locked(&mut meta, Item::Data(entry))?;
            meta.len += 1;
        }
        Ok(old)
    }

    pub(crate) fn remove_locked<P>(
        &self,
        meta: &mut TreeMeta<S::Desc>,
        desc: &S::Desc,
        pred: &P,
    ) -> PageTreeResult<Option<S::Entry>>
    where
        P: Fn(&S::Entry) -> bool,
    {
        let root = match meta.root.clone() {
            Some(root) => root,
            None => return Ok(None),
        };
        let (mut path, pos) = match self.find_path(root, desc, pred)? {
            Some(found) => found,
            None => return Ok(None),
        };

        let frame = top(&mut path)?;
        let entries = frame
            .node
            .entries_mut()
            .ok_or_else(|| PageTreeError::invariant("removal path does not end in a leaf"))?;
        let removed = entries.remove(pos);
        frame.dirty = true;
        meta.len = meta.len.saturating_sub(1);

        self.condense(meta, path)?;
        Ok(Some(removed))
    }

    /// Depth-first search for a leaf entry overlapping `desc` and satisfying
    /// `pred`. On success the returned path ends in that leaf and every node
    /// on it is fixed.
    fn find_path<'c, P>(
        &'c self,
        root: IndexEntry<S::Desc>,
        desc: &S::Desc,
        pred: &P,
    ) -> PageTreeResult<Option<(Path<'c, C, S::Entry, S::Desc>, usize)>>
    where
        P: Fn(&S::Entry) -> bool,
    {
        if !root.descriptor.overlaps(desc) {
            return Ok(None);
        }
        let mut path = Path::new(&self.container);
        path.push(root, None)?;
        // next child to try, per depth
        let mut next = vec![0usize];

        loop {
            let depth = path.len() - 1;
            let frame = path.top().ok_or_else(empty_path)?;
            let step = match &frame.node {
                Node::Leaf { entries } => {
                    let found = entries
                        .iter()
                        .position(|e| self.ops.descriptor(e).overlaps(desc) && pred(e));
                    if let Some(pos) = found {
                        return Ok(Some((path, pos)));
                    }
                    None
                }
                Node::Internal { children, .. } => {
                    let start = next[depth];
                    children
                        .iter()
                        .enumerate()
                        .skip(start)
                        .find(|(_, child)| child.descriptor.overlaps(desc))
                        .map(|(idx, child)| (idx, child.clone()))
                }
            };

            match step {
                Some((idx, child)) => {
                    next[depth] = idx + 1;
                    path.push(child, Some(idx))?;
                    next.push(0);
                }
                None => {
                    path.pop()?;
                    next.pop();
                    if path.is_empty() {
                        return Ok(None);
                    }
                }
            }
        }
    }

    /// Repairs the path after a removal.
    fn condense(
        &self,
        meta: &mut TreeMeta<S::Desc>,
        mut path: Path<'_, C, S::Entry, S::Desc>,
    ) -> PageTreeResult<()> {
        let mut orphans: Vec<Item<S::Entry, S::Desc>> = Vec::new();

        while path.len() > 1 {
            let mut frame = path.take().ok_or_else(empty_path)?;
            let idx = frame.child_idx.ok_or_else(empty_path)?;
            let level = frame.node.level();

            if self.capacity.underflows(level, frame.node.len()) {
                let id = frame.entry.id;
                let node = std::mem::replace(&mut frame.node, Node::leaf(Vec::new()));
                orphans.extend(into_items(node));
                self.container.remove(id)?;
                log::debug!(
                    "dissolved underflowing node {} on level {}, {} orphans pending",
                    id,
                    level,
                    orphans.len()
                );

                let parent = top(&mut path)?;
                let children = parent
                    .node
                    .children_mut()
                    .ok_or_else(|| PageTreeError::invariant("parent of a node is a leaf"))?;
                if idx >= children.len() {
                    return Err(PageTreeError::invariant(&format!(
                        "child position {} out of range in node {}",
                        idx, parent.entry.id
                    )));
                }
                children.remove(idx);
                parent.dirty = true;
            } else if frame.dirty {
                frame.entry.descriptor = self.ops.compute_descriptor(&frame.node).ok_or_else(|| {
                    PageTreeError::invariant("non-empty node without a descriptor")
                })?;
                self.ops.normalize(&mut frame.node, &frame.entry.descriptor);
                path.release(&frame)?;

                let parent = top(&mut path)?;
                let children = parent
                    .node
                    .children_mut()
                    .ok_or_else(|| PageTreeError::invariant("parent of a node is a leaf"))?;
                let slot = children.get_mut(idx).ok_or_else(|| {
                    PageTreeError::invariant(&format!("child position {} out of range", idx))
                })?;
                *slot = frame.entry;
                parent.dirty = true;
            } else {
                path.release(&frame)?;
            }
        }

        let mut root = path.take().ok_or_else(empty_path)?;
        if root.node.is_empty() {
            self.container.remove(root.entry.id)?;
            meta.root = None;
            meta.height = 0;
            log::debug!("removed empty root {}", root.entry.id);
        } else {
            if root.dirty {
                root.entry.descriptor = self
                    .ops
                    .compute_descriptor(&root.node)
                    .ok_or_else(|| PageTreeError::invariant("non-empty root without a descriptor"))?;
                self.ops.normalize(&mut root.node, &root.entry.descriptor);
            }
            path.release(&root)?;
            meta.root = Some(root.entry);
        }
        drop(path);

        // higher levels first so that lower orphans find their subtrees
        orphans.sort_by_key(|item| Reverse(item.level()));
        for item in orphans {
            self.insert_locked(meta, item)?;
        }

        self.collapse_root(meta)
    }

    /// Replaces an internal root with a single child by that child.
    fn collapse_root(&self, meta: &mut TreeMeta<S::Desc>) -> PageTreeResult<()> {
        while let Some(root) = meta.root.clone() {
            if root.child_level() == 0 {
                break;
            }
            let node = self.container.get(root.id, true)?;
            let children = match node {
                Node::Internal { children, .. } if children.len() <= 1 => children,
                _ => break,
            };
            self.container.remove(root.id)?;
            match children.into_iter().next() {
                Some(child) => {
                    meta.height = root.parent_level - 1;
                    meta.root = Some(IndexEntry::new(child.id, child.descriptor, meta.height));
                    log::debug!("root shrank, tree height is now {}", meta.height);
                }
                None => {
                    meta.root = None;
                    meta.height = 0;
                }
            }
        }
        Ok(())
    }

    /// Walks the whole tree and verifies levels, capacity bounds, the
    /// OR-property and the entry count.
    pub fn check(&self) -> PageTreeResult<TreeReport> {
        let meta = self.meta.read();
        let mut report = TreeReport {
            height: meta.height,
            nodes_per_level: vec![0; meta.height as usize],
            entries: 0,
        };
        let root = match meta.root.clone() {
            Some(root) => root,
            None => {
                if meta.len != 0 || meta.height != 0 {
                    return Err(PageTreeError::invariant(&format!(
                        "empty tree reports {} entries and height {}",
                        meta.len, meta.height
                    )));
                }
                return Ok(report);
            }
        };
        if root.parent_level != meta.height {
            return Err(PageTreeError::invariant(&format!(
                "root entry level {} does not match height {}",
                root.parent_level, meta.height
            )));
        }

        let mut stack = vec![(root, true)];
        while let Some((entry, is_root)) = stack.pop() {
            let node = self.container.get(entry.id, true)?;
            let level = node.level();
            if level != entry.child_level() {
                return Err(PageTreeError::invariant(&format!(
                    "node {} is on level {}, its entry expects {}",
                    entry.id,
                    level,
                    entry.child_level()
                )));
            }

            let bounds = self.capacity.bounds(level);
            let len = node.len();
            let legal = if is_root {
                len >= 1 && len <= bounds.max
            } else {
                len >= bounds.min && len <= bounds.max
            };
            if !legal {
                return Err(PageTreeError::invariant(&format!(
                    "node {} on level {} holds {} entries, bounds are [{}, {}]",
                    entry.id, level, len, bounds.min, bounds.max
                )));
            }

            match &node {
                Node::Leaf { entries } => {
                    for e in entries {
                        let desc = self.ops.descriptor(e);
                        if !entry.descriptor.contains(&desc) {
                            return Err(PageTreeError::invariant(&format!(
                                "descriptor of node {} does not contain entry {:?}",
                                entry.id, e
                            )));
                        }
                    }
                    report.entries += entries.len() as u64;
                }
                Node::Internal { children, .. } => {
                    for child in children {
                        if child.parent_level != level {
                            return Err(PageTreeError::invariant(&format!(
                                "entry for node {} claims parent level {}, held on level {}",
                                child.id, child.parent_level, level
                            )));
                        }
                        if !entry.descriptor.contains(&child.descriptor) {
                            return Err(PageTreeError::invariant(&format!(
                                "descriptor of node {} does not contain child {}",
                                entry.id, child.id
                            )));
                        }
                        stack.push((child.clone(), false));
                    }
                }
            }
            self.ops.check_node(&node, &entry.descriptor)?;

            if let Some(count) = report.nodes_per_level.get_mut(level as usize) {
                *count += 1;
            }
        }

        if report.entries != meta.len {
            return Err(PageTreeError::invariant(&format!(
                "tree reports {} entries, leaves hold {}",
                meta.len, report.entries
            )));
        }
        Ok(report)
    }
}
