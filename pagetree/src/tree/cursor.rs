//! Lazy, level-synchronised query cursor.
//!
//! The cursor keeps one iterator position per level. An index entry that
//! passes the filter is expanded into its child only when the cursor is
//! advanced past it, so a query that is abandoned early never loads the rest
//! of the tree. Nodes on the cursor's stack stay fixed in the container until
//! the cursor moves past them, is closed, or is dropped.

use std::marker::PhantomData;

use super::engine::NodeOf;
use super::node::{IndexEntry, Item, Node};
use super::ops::NodeOps;
use crate::container::{Container, PageId};
use crate::descriptor::Descriptor;
use crate::errors::{ErrorKind, PageTreeError, PageTreeResult};

/// Decides which entries a [`Cursor`] visits.
///
/// `enter` is called once per visited node with the node's own descriptor;
/// the returned context is handed to the tests of that node's entries. Metric
/// trees use it to compute the query-to-parent distance once per node.
pub trait QueryFilter<D> {
    type Context;

    fn enter(&self, node: &D) -> Self::Context;

    /// Should the index entry `child` be expanded (or yielded on the target level)?
    fn index(&self, ctx: &Self::Context, child: &D) -> bool;

    /// Should the data entry with descriptor `entry` be yielded?
    fn leaf(&self, ctx: &Self::Context, entry: &D) -> bool {
        self.index(ctx, entry)
    }
}

/// Accepts entries whose descriptor overlaps the query descriptor.
#[derive(Debug, Clone)]
pub struct Overlaps<D>(pub D);

impl<D: Descriptor> QueryFilter<D> for Overlaps<D> {
    type Context = ();

    fn enter(&self, _node: &D) {}

    fn index(&self, _ctx: &(), child: &D) -> bool {
        child.overlaps(&self.0)
    }
}

/// Accepts everything.
#[derive(Debug)]
pub struct All<D>(PhantomData<fn(&D)>);

impl<D> All<D> {
    pub fn new() -> Self {
        All(PhantomData)
    }
}

impl<D> Default for All<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D> QueryFilter<D> for All<D> {
    type Context = ();

    fn enter(&self, _node: &D) {}

    fn index(&self, _ctx: &(), _child: &D) -> bool {
        true
    }
}

struct Level<E, D, X> {
    id: PageId,
    node: Node<E, D>,
    ctx: X,
    pos: usize,
}

/// Forward-only lazy query. Re-querying requires a new cursor.
pub struct Cursor<'a, S, C, F>
where
    S: NodeOps,
    C: Container<NodeOf<S>>,
    F: QueryFilter<S::Desc>,
{
    ops: &'a S,
    container: &'a C,
    filter: F,
    target_level: u32,
    levels: Vec<Level<S::Entry, S::Desc, F::Context>>,
    root: Option<IndexEntry<S::Desc>>,
    finished: bool,
}

impl<'a, S, C, F> Cursor<'a, S, C, F>
where
    S: NodeOps,
    C: Container<NodeOf<S>>,
    F: QueryFilter<S::Desc>,
{
    pub fn new(
        ops: &'a S,
        container: &'a C,
        root: Option<IndexEntry<S::Desc>>,
        filter: F,
        target_level: u32,
    ) -> Self {
        Self {
            ops,
            container,
            filter,
            target_level,
            levels: Vec::new(),
            root,
            finished: false,
        }
    }

    /// Releases every node still fixed by the cursor.
    pub fn close(mut self) -> PageTreeResult<()> {
        self.release()
    }

    /// Only the data entries of a level-0 query.
    pub fn entries(self) -> impl Iterator<Item = PageTreeResult<S::Entry>> + 'a
    where
        F: 'a,
        F::Context: 'a,
    {
        self.filter_map(|item| match item {
            Ok(Item::Data(entry)) => Some(Ok(entry)),
            Ok(Item::Index(_)) => None,
            Err(err) => Some(Err(err)),
        })
    }

    fn release(&mut self) -> PageTreeResult<()> {
        self.finished = true;
        self.root = None;
        let mut result = Ok(());
        for level in self.levels.drain(..).rev() {
            if let Err(err) = self.container.unfix(level.id) {
                result = Err(err);
            }
        }
        result
    }

    fn descend(&mut self, entry: &IndexEntry<S::Desc>) -> PageTreeResult<()> {
        let node = self.container.get(entry.id, false)?;
        let ctx = self.filter.enter(&entry.descriptor);
        self.levels.push(Level {
            id: entry.id,
            node,
            ctx,
            pos: 0,
        });
        Ok(())
    }

    fn advance(&mut self) -> PageTreeResult<Option<Item<S::Entry, S::Desc>>> {
        if let Some(root) = self.root.take() {
            if root.child_level() < self.target_level {
                return Err(PageTreeError::new(
                    &format!(
                        "query level {} is above the root's child level {}",
                        self.target_level,
                        root.child_level()
                    ),
                    ErrorKind::InvalidOperation,
                ));
            }
            self.descend(&root)?;
        }

        loop {
            let level = match self.levels.last_mut() {
                Some(level) => level,
                None => return Ok(None),
            };
            if level.pos >= level.node.len() {
                let id = level.id;
                self.levels.pop();
                self.container.unfix(id)?;
                continue;
            }
            let pos = level.pos;
            level.pos += 1;

            let node_level = level.node.level();
            match &level.node {
                Node::Leaf { entries } => {
                    let entry = &entries[pos];
                    let desc = self.ops.descriptor(entry);
                    if self.filter.leaf(&level.ctx, &desc) {
                        return Ok(Some(Item::Data(entry.clone())));
                    }
                }
                Node::Internal { children, .. } => {
                    let child = &children[pos];
                    if !self.filter.index(&level.ctx, &child.descriptor) {
                        continue;
                    }
                    if node_level == self.target_level {
                        return Ok(Some(Item::Index(child.clone())));
                    }
                    let child = child.clone();
                    self.descend(&child)?;
                }
            }
        }
    }
}

impl<S, C, F> Iterator for Cursor<'_, S, C, F>
where
    S: NodeOps,
    C: Container<NodeOf<S>>,
    F: QueryFilter<S::Desc>,
{
    type Item = PageTreeResult<Item<S::Entry, S::Desc>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.advance() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(err) => {
                let _ = self.release();
                Some(Err(err))
            }
        }
    }
}

impl<S, C, F> Drop for Cursor<'_, S, C, F>
where
    S: NodeOps,
    C: Container<NodeOf<S>>,
    F: QueryFilter<S::Desc>,
{
    fn drop(&mut self) {
        let _ = self.release();
    }
}
