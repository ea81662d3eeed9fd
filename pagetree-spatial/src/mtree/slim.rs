//! Slim-tree split by minimum spanning tree.
//!
//! The entries of the overflowing node form a complete graph weighted by
//! centre distance. Edges are contracted shortest first (Kruskal) until two
//! components remain; the components are the partitions.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use itertools::Itertools;
use pagetree::tree::{Partition, SplitBounds};

use crate::metric::Metric;
use crate::sphere::Sphere;

#[derive(Debug, Clone, Copy)]
struct Edge {
    distance: f64,
    a: usize,
    b: usize,
}

impl PartialEq for Edge {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Edge {}

impl PartialOrd for Edge {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Edge {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| (self.a, self.b).cmp(&(other.a, other.b)))
    }
}

/// Disjoint sets over `0..n` with path halving and union by size.
struct UnionFind {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            size: vec![1; n],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    /// Joins the sets of `a` and `b`; `false` if they were already one.
    fn union(&mut self, a: usize, b: usize) -> bool {
        let (mut ra, mut rb) = (self.find(a), self.find(b));
        if ra == rb {
            return false;
        }
        if self.size[ra] < self.size[rb] {
            std::mem::swap(&mut ra, &mut rb);
        }
        self.parent[rb] = ra;
        self.size[ra] += self.size[rb];
        true
    }
}

/// Splits `items` into the two components of their minimum spanning tree
/// with the longest edge removed. The component holding the first item
/// becomes the first partition unless only the other one fits `bounds`.
///
/// Gives the items back when neither arrangement fits `bounds`.
pub fn mst_split<M, T, F>(
    items: Vec<T>,
    sphere: F,
    bounds: SplitBounds,
) -> Result<Partition<T>, Vec<T>>
where
    M: Metric,
    F: Fn(&T) -> &Sphere<M>,
{
    let n = items.len();
    if n < 2 {
        return Err(items);
    }

    let mut edges: BinaryHeap<Reverse<Edge>> = (0..n)
        .tuple_combinations()
        .map(|(a, b)| {
            let distance = sphere(&items[a]).center_distance(sphere(&items[b]));
            Reverse(Edge { distance, a, b })
        })
        .collect();

    let mut sets = UnionFind::new(n);
    let mut components = n;
    while components > 2 {
        match edges.pop() {
            Some(Reverse(edge)) => {
                if sets.union(edge.a, edge.b) {
                    components -= 1;
                }
            }
            None => break,
        }
    }

    let anchor = sets.find(0);
    let in_first: Vec<bool> = (0..n).map(|idx| sets.find(idx) == anchor).collect();
    let first_len = in_first.iter().filter(|x| **x).count();

    let swap = if bounds.accepts(first_len, n) {
        false
    } else if bounds.accepts(n - first_len, n) {
        true
    } else {
        log::trace!(
            "spanning tree components of {} and {} entries violate [{}, {}]",
            first_len,
            n - first_len,
            bounds.min,
            bounds.max
        );
        return Err(items);
    };

    let mut first = Vec::with_capacity(n);
    let mut second = Vec::with_capacity(n);
    for (item, with_anchor) in items.into_iter().zip(in_first) {
        if with_anchor != swap {
            first.push(item);
        } else {
            second.push(item);
        }
    }
    Ok((first, second))
}
