//! Node split algorithms of the R-tree family.
//!
//! Every algorithm works on anything that has a rectangle (leaf entries and
//! index entries alike) and returns a partition whose first part has a size
//! accepted by the [`SplitBounds`] the engine hands in.

use itertools::Itertools;
use pagetree::descriptor::Descriptor;
use pagetree::tree::{Partition, SplitBounds};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::rectangle::Rectangle;

/// How an overflowing node is divided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SplitStrategy {
    /// Margin, overlap and area minimising split of the R*-tree
    #[default]
    RStar,
    /// Guttman's quadratic split
    Quadratic,
    /// Guttman's linear split
    Linear,
    /// Greene's split: one axis, sorted, cut in the middle
    Greene,
}

impl SplitStrategy {
    pub fn split<T, F>(&self, items: Vec<T>, bounds: SplitBounds, rect: F) -> Partition<T>
    where
        F: Fn(&T) -> &Rectangle,
    {
        match self {
            SplitStrategy::RStar => rstar_split(items, bounds, rect),
            SplitStrategy::Quadratic => quadratic_split(items, bounds, rect),
            SplitStrategy::Linear => linear_split(items, bounds, rect),
            SplitStrategy::Greene => greene_split(items, bounds, rect),
        }
    }
}

/// Sort key of an R* distribution list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edge {
    Lower,
    Upper,
}

/// One candidate split of a sorted entry list: the first `first` entries
/// against the rest.
#[derive(Debug, Clone)]
pub struct Distribution {
    pub axis: usize,
    pub first: usize,
    pub first_rect: Rectangle,
    pub second_rect: Rectangle,
    edge: Edge,
}

impl Distribution {
    pub fn margin(&self) -> f64 {
        self.first_rect.margin() + self.second_rect.margin()
    }

    pub fn overlap(&self) -> f64 {
        self.first_rect.overlap(&self.second_rect)
    }

    pub fn area(&self) -> f64 {
        self.first_rect.area() + self.second_rect.area()
    }
}

fn by_edge(axis: usize, edge: Edge) -> impl Fn(&Rectangle, &Rectangle) -> Ordering {
    move |a, b| match edge {
        Edge::Lower => a
            .lower(axis)
            .total_cmp(&b.lower(axis))
            .then(a.upper(axis).total_cmp(&b.upper(axis))),
        Edge::Upper => a
            .upper(axis)
            .total_cmp(&b.upper(axis))
            .then(a.lower(axis).total_cmp(&b.lower(axis))),
    }
}

/// Positions of `rects` in the order of `edge` on `axis`. Stable.
fn sorted_order(rects: &[&Rectangle], axis: usize, edge: Edge) -> Vec<usize> {
    let cmp = by_edge(axis, edge);
    let mut order: Vec<usize> = (0..rects.len()).collect();
    order.sort_by(|&a, &b| cmp(rects[a], rects[b]));
    order
}

/// Bounding rectangles of every prefix of `order`.
fn running_bounds(rects: &[&Rectangle], order: impl Iterator<Item = usize>) -> Vec<Rectangle> {
    let mut result: Vec<Rectangle> = Vec::with_capacity(rects.len());
    for idx in order {
        let next = match result.last() {
            Some(prev) => prev.union_with(rects[idx]),
            None => rects[idx].clone(),
        };
        result.push(next);
    }
    result
}

/// All legal distributions of one sort order on one axis.
fn axis_distributions(
    rects: &[&Rectangle],
    order: &[usize],
    axis: usize,
    edge: Edge,
    bounds: SplitBounds,
) -> Vec<Distribution> {
    let n = order.len();
    let prefix = running_bounds(rects, order.iter().copied());
    // suffix[i] covers order[n - 1 - i..]
    let suffix = running_bounds(rects, order.iter().rev().copied());
    bounds
        .sizes()
        .filter(|&k| k >= 1 && k < n)
        .map(|k| Distribution {
            axis,
            first: k,
            first_rect: prefix[k - 1].clone(),
            second_rect: suffix[n - k - 1].clone(),
            edge,
        })
        .collect()
}

/// Every distribution the R* split considers, grouped by axis.
pub fn distributions(rects: &[&Rectangle], bounds: SplitBounds) -> Vec<Vec<Distribution>> {
    let dims = rects.first().map(|r| r.dims()).unwrap_or(0);
    (0..dims)
        .map(|axis| {
            [Edge::Lower, Edge::Upper]
                .into_iter()
                .flat_map(|edge| {
                    let order = sorted_order(rects, axis, edge);
                    axis_distributions(rects, &order, axis, edge, bounds)
                })
                .collect()
        })
        .collect()
}

/// The R* choice: the axis with the smallest margin sum, then the
/// distribution of that axis with the smallest overlap, then area. Ties keep
/// the first candidate (lowest axis, lower edge, smallest first partition).
pub fn choose_distribution(candidates: Vec<Vec<Distribution>>) -> Option<Distribution> {
    let mut best_axis: Option<(f64, Vec<Distribution>)> = None;
    for axis in candidates {
        if axis.is_empty() {
            continue;
        }
        let margin: f64 = axis.iter().map(Distribution::margin).sum();
        match &best_axis {
            Some((best, _)) if margin >= *best => {}
            _ => best_axis = Some((margin, axis)),
        }
    }

    let (_, axis) = best_axis?;
    let mut best: Option<Distribution> = None;
    for dist in axis {
        let better = match &best {
            None => true,
            Some(b) => {
                let (o, bo) = (dist.overlap(), b.overlap());
                o < bo || (o == bo && dist.area() < b.area())
            }
        };
        if better {
            best = Some(dist);
        }
    }
    best
}

/// Reorders `items` by `order` and cuts after `first`.
fn materialize<T>(items: Vec<T>, order: &[usize], first: usize) -> Partition<T> {
    let mut slots: Vec<Option<T>> = items.into_iter().map(Some).collect();
    let mut sorted: Vec<T> = order.iter().filter_map(|&idx| slots[idx].take()).collect();
    let second = sorted.split_off(first.min(sorted.len()));
    (sorted, second)
}

fn middle(len: usize, bounds: SplitBounds) -> usize {
    (len / 2).clamp(bounds.min, bounds.max)
}

/// R*-tree split.
pub fn rstar_split<T, F>(items: Vec<T>, bounds: SplitBounds, rect: F) -> Partition<T>
where
    F: Fn(&T) -> &Rectangle,
{
    let chosen = {
        let rects: Vec<&Rectangle> = items.iter().map(&rect).collect();
        choose_distribution(distributions(&rects, bounds))
            .map(|dist| (sorted_order(&rects, dist.axis, dist.edge), dist.first))
    };
    match chosen {
        Some((order, first)) => {
            log::trace!("R* split of {} entries after {}", order.len(), first);
            materialize(items, &order, first)
        }
        None => {
            let first = middle(items.len(), bounds);
            let order: Vec<usize> = (0..items.len()).collect();
            materialize(items, &order, first)
        }
    }
}

/// Guttman's quadratic seeds: the pair wasting the most area when covered
/// together.
fn quadratic_seeds(rects: &[&Rectangle]) -> (usize, usize) {
    let mut best = (0, 1);
    let mut worst_waste = f64::NEG_INFINITY;
    for (i, j) in (0..rects.len()).tuple_combinations() {
        let waste = rects[i].union_with(rects[j]).area() - rects[i].area() - rects[j].area();
        if waste > worst_waste {
            worst_waste = waste;
            best = (i, j);
        }
    }
    best
}

/// Guttman's linear seeds: on every axis the entry with the highest lower
/// bound and the one with the lowest upper bound, their separation
/// normalised by the width of the whole set; the axis with the greatest
/// separation wins.
fn linear_seeds(rects: &[&Rectangle]) -> (usize, usize) {
    let dims = rects.first().map(|r| r.dims()).unwrap_or(0);
    let mut best = (0, 1);
    let mut best_separation = f64::NEG_INFINITY;
    for axis in 0..dims {
        let mut highest_low = 0;
        let mut lowest_high = 0;
        let mut lo = f64::INFINITY;
        let mut hi = f64::NEG_INFINITY;
        for (idx, r) in rects.iter().enumerate() {
            if r.lower(axis) > rects[highest_low].lower(axis) {
                highest_low = idx;
            }
            if r.upper(axis) < rects[lowest_high].upper(axis) {
                lowest_high = idx;
            }
            lo = lo.min(r.lower(axis));
            hi = hi.max(r.upper(axis));
        }
        if highest_low == lowest_high {
            // the same entry is extreme on both sides; pair it with any other
            lowest_high = if highest_low == 0 { 1 } else { 0 };
        }
        let width = hi - lo;
        let gap = rects[highest_low].lower(axis) - rects[lowest_high].upper(axis);
        let separation = if width > 0.0 { gap / width } else { 0.0 };
        if separation > best_separation {
            best_separation = separation;
            best = (lowest_high.min(highest_low), lowest_high.max(highest_low));
        }
    }
    best
}

/// Greedy assignment shared by the quadratic and linear splits.
struct Groups {
    members: [Vec<usize>; 2],
    rects: [Rectangle; 2],
}

impl Groups {
    fn new(rects: &[&Rectangle], seeds: (usize, usize)) -> Self {
        Self {
            members: [vec![seeds.0], vec![seeds.1]],
            rects: [rects[seeds.0].clone(), rects[seeds.1].clone()],
        }
    }

    /// Group an entry prefers: least enlargement, then smaller area, then
    /// fewer entries, then the first group.
    fn preferred(&self, r: &Rectangle) -> usize {
        let key = |g: usize| {
            (
                self.rects[g].enlargement(r),
                self.rects[g].area(),
                self.members[g].len(),
            )
        };
        let (a, b) = (key(0), key(1));
        let second = b.0 < a.0
            || (b.0 == a.0 && (b.1 < a.1 || (b.1 == a.1 && b.2 < a.2)));
        usize::from(second)
    }

    fn add(&mut self, group: usize, idx: usize, r: &Rectangle) {
        self.members[group].push(idx);
        self.rects[group].union(r);
    }

    /// A group forced by the size limits of the first partition, if any.
    fn forced(&self, remaining: usize, bounds: SplitBounds) -> Option<usize> {
        if self.members[0].len() >= bounds.max {
            Some(1)
        } else if self.members[0].len() + remaining <= bounds.min {
            Some(0)
        } else {
            None
        }
    }

    fn into_partition<T>(self, items: Vec<T>) -> Partition<T> {
        let first = self.members[0].len();
        let order: Vec<usize> = self.members.into_iter().flatten().collect();
        materialize(items, &order, first)
    }
}

/// Guttman's quadratic split with `PickNext`.
pub fn quadratic_split<T, F>(items: Vec<T>, bounds: SplitBounds, rect: F) -> Partition<T>
where
    F: Fn(&T) -> &Rectangle,
{
    let groups = {
        let rects: Vec<&Rectangle> = items.iter().map(&rect).collect();
        let seeds = quadratic_seeds(&rects);
        let mut groups = Groups::new(&rects, seeds);
        let mut pending: Vec<usize> = (0..rects.len())
            .filter(|&i| i != seeds.0 && i != seeds.1)
            .collect();

        while !pending.is_empty() {
            if let Some(group) = groups.forced(pending.len(), bounds) {
                for idx in pending.drain(..) {
                    groups.add(group, idx, rects[idx]);
                }
                break;
            }
            // PickNext: the entry with the strongest preference
            let mut pick = 0;
            let mut strongest = f64::NEG_INFINITY;
            for (pos, &idx) in pending.iter().enumerate() {
                let diff = (groups.rects[0].enlargement(rects[idx])
                    - groups.rects[1].enlargement(rects[idx]))
                .abs();
                if diff > strongest {
                    strongest = diff;
                    pick = pos;
                }
            }
            let idx = pending.remove(pick);
            let group = groups.preferred(rects[idx]);
            groups.add(group, idx, rects[idx]);
        }
        groups
    };
    groups.into_partition(items)
}

/// Guttman's linear split: linear seeds, remaining entries assigned in their
/// input order.
pub fn linear_split<T, F>(items: Vec<T>, bounds: SplitBounds, rect: F) -> Partition<T>
where
    F: Fn(&T) -> &Rectangle,
{
    let groups = {
        let rects: Vec<&Rectangle> = items.iter().map(&rect).collect();
        let seeds = linear_seeds(&rects);
        let mut groups = Groups::new(&rects, seeds);
        let pending: Vec<usize> = (0..rects.len())
            .filter(|&i| i != seeds.0 && i != seeds.1)
            .collect();

        for (pos, &idx) in pending.iter().enumerate() {
            let remaining = pending.len() - pos;
            let group = groups
                .forced(remaining, bounds)
                .unwrap_or_else(|| groups.preferred(rects[idx]));
            groups.add(group, idx, rects[idx]);
        }
        groups
    };
    groups.into_partition(items)
}

/// Greene's split.
///
/// The quadratic seeds pick the axis: the one on which the seeds are
/// separated most, normalised by the extent of the whole node (first axis on
/// ties). Entries are sorted by their lower bound on that axis and cut in
/// the middle.
pub fn greene_split<T, F>(items: Vec<T>, bounds: SplitBounds, rect: F) -> Partition<T>
where
    F: Fn(&T) -> &Rectangle,
{
    let (order, first) = {
        let rects: Vec<&Rectangle> = items.iter().map(&rect).collect();
        let axis = greene_axis(&rects);
        (sorted_order(&rects, axis, Edge::Lower), middle(rects.len(), bounds))
    };
    materialize(items, &order, first)
}

/// Split axis of Greene's algorithm.
pub fn greene_axis(rects: &[&Rectangle]) -> usize {
    if rects.len() < 2 {
        return 0;
    }
    let (a, b) = quadratic_seeds(rects);
    let (a, b) = (rects[a], rects[b]);
    let dims = a.dims();
    let mut best_axis = 0;
    let mut best_separation = f64::NEG_INFINITY;
    for axis in 0..dims {
        let lo = rects.iter().map(|r| r.lower(axis)).fold(f64::INFINITY, f64::min);
        let hi = rects
            .iter()
            .map(|r| r.upper(axis))
            .fold(f64::NEG_INFINITY, f64::max);
        let gap = a.lower(axis).max(b.lower(axis)) - a.upper(axis).min(b.upper(axis));
        let width = hi - lo;
        let separation = if width > 0.0 { gap / width } else { 0.0 };
        if separation > best_separation {
            best_separation = separation;
            best_axis = axis;
        }
    }
    best_axis
}
