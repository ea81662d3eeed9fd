use std::cmp::Ordering;
use std::collections::BinaryHeap;

use super::engine::NodeOf;
use super::node::{IndexEntry, Item, Node};
use super::ops::NodeOps;
use crate::container::Container;
use crate::errors::PageTreeResult;

/// Total order over priorities (NaN sorts last).
#[derive(Debug, Clone, Copy)]
struct PriorityKey(f64);

impl PartialEq for PriorityKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PriorityKey {}

impl PartialOrd for PriorityKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PriorityKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Something waiting in the queue: a subtree to expand or a result to yield.
#[derive(Debug, Clone)]
pub enum Candidate<E, D> {
    Subtree(IndexEntry<D>),
    Result(Item<E, D>),
}

struct Queued<E, D> {
    priority: PriorityKey,
    seq: u64,
    candidate: Candidate<E, D>,
}

impl<E, D> PartialEq for Queued<E, D> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl<E, D> Eq for Queued<E, D> {}

impl<E, D> PartialOrd for Queued<E, D> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<E, D> Ord for Queued<E, D> {
    // reversed: BinaryHeap is a max-heap, the smallest priority must pop first;
    // equal priorities pop in insertion order
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Priority-queue driven query.
///
/// The queue is seeded with the root. Each pull dequeues the candidate with
/// the smallest priority: subtrees above the target level are expanded into
/// their children, items on the target level are yielded together with their
/// priority. With a monotone priority (a subtree never ranks before its
/// content) results come out in ascending priority order, which makes
/// nearest-neighbour search a matter of passing a distance function.
///
/// No node stays fixed between pulls.
pub struct BestFirst<'a, S, C, P>
where
    S: NodeOps,
{
    ops: &'a S,
    container: &'a C,
    priority: P,
    target_level: u32,
    queue: BinaryHeap<Queued<S::Entry, S::Desc>>,
    seq: u64,
    failed: bool,
}

impl<'a, S, C, P> BestFirst<'a, S, C, P>
where
    S: NodeOps,
    C: Container<NodeOf<S>>,
    P: Fn(&S::Desc) -> Option<f64>,
{
    pub fn new(
        ops: &'a S,
        container: &'a C,
        root: Option<IndexEntry<S::Desc>>,
        priority: P,
        target_level: u32,
    ) -> Self {
        let mut query = Self {
            ops,
            container,
            priority,
            target_level,
            queue: BinaryHeap::new(),
            seq: 0,
            failed: false,
        };
        if let Some(root) = root {
            if root.child_level() >= target_level {
                query.enqueue(&root.descriptor.clone(), Candidate::Subtree(root));
            }
        }
        query
    }

    /// Number of candidates waiting in the queue.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    fn enqueue(&mut self, desc: &S::Desc, candidate: Candidate<S::Entry, S::Desc>) {
        if let Some(priority) = (self.priority)(desc) {
            self.queue.push(Queued {
                priority: PriorityKey(priority),
                seq: self.seq,
                candidate,
            });
            self.seq += 1;
        }
    }

    fn expand(&mut self, entry: &IndexEntry<S::Desc>) -> PageTreeResult<()> {
        let node = self.container.get(entry.id, true)?;
        let on_target = node.level() == self.target_level;
        match node {
            Node::Leaf { entries } => {
                for e in entries {
                    let desc = self.ops.descriptor(&e);
                    self.enqueue(&desc, Candidate::Result(Item::Data(e)));
                }
            }
            Node::Internal { children, .. } => {
                for child in children {
                    let desc = child.descriptor.clone();
                    let candidate = if on_target {
                        Candidate::Result(Item::Index(child))
                    } else {
                        Candidate::Subtree(child)
                    };
                    self.enqueue(&desc, candidate);
                }
            }
        }
        Ok(())
    }
}

impl<S, C, P> Iterator for BestFirst<'_, S, C, P>
where
    S: NodeOps,
    C: Container<NodeOf<S>>,
    P: Fn(&S::Desc) -> Option<f64>,
{
    type Item = PageTreeResult<(Item<S::Entry, S::Desc>, f64)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        while let Some(queued) = self.queue.pop() {
            match queued.candidate {
                Candidate::Result(item) => return Some(Ok((item, queued.priority.0))),
                Candidate::Subtree(entry) => {
                    if let Err(err) = self.expand(&entry) {
                        self.failed = true;
                        self.queue.clear();
                        return Some(Err(err));
                    }
                }
            }
        }
        None
    }
}
