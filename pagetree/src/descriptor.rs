//! Region descriptors summarising the extent of an entry or a subtree.
//!
//! Every index entry caches the descriptor of the subtree it references. The
//! engine only needs the operations of [`Descriptor`]; the concrete region
//! shapes live next to the trees that use them ([`KeyRange`] here, rectangles
//! and spheres in the spatial crate, multiversion regions in [`crate::mvbt`]).

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// A cloneable, unionable region value.
///
/// Implementations must make `union` monotone: after `a.union(&b)`,
/// `a.contains(&b)` holds and `a` still contains everything it contained
/// before.
pub trait Descriptor: Clone + Debug + Serialize + DeserializeOwned {
    /// Returns `true` if the two regions share at least one point.
    fn overlaps(&self, other: &Self) -> bool;

    /// Returns `true` if `other` lies completely inside this region.
    fn contains(&self, other: &Self) -> bool;

    /// Grows this region in place so that it also covers `other`.
    fn union(&mut self, other: &Self);
}

/// Unions a sequence of descriptors.
///
/// Returns `None` for an empty sequence: an empty subtree has no region.
pub fn union_all<'a, D, I>(descriptors: I) -> Option<D>
where
    D: Descriptor + 'a,
    I: IntoIterator<Item = &'a D>,
{
    let mut iter = descriptors.into_iter();
    let mut result = iter.next()?.clone();
    for descriptor in iter {
        result.union(descriptor);
    }
    Some(result)
}

/// Closed key interval `[min, max]`.
///
/// Used as the descriptor of B+-tree index entries; a single key is the
/// degenerate interval `[key, key]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyRange<K> {
    pub min: K,
    pub max: K,
}

impl<K: Ord + Clone> KeyRange<K> {
    /// Creates a range, swapping the bounds if they are given in reverse.
    pub fn new(min: K, max: K) -> Self {
        if min <= max {
            KeyRange { min, max }
        } else {
            KeyRange { min: max, max: min }
        }
    }

    /// The degenerate range holding a single key.
    pub fn point(key: K) -> Self {
        KeyRange {
            min: key.clone(),
            max: key,
        }
    }

    pub fn contains_key(&self, key: &K) -> bool {
        &self.min <= key && key <= &self.max
    }
}

impl<K> Descriptor for KeyRange<K>
where
    K: Ord + Clone + Debug + Serialize + DeserializeOwned,
{
    fn overlaps(&self, other: &Self) -> bool {
        self.min <= other.max && other.min <= self.max
    }

    fn contains(&self, other: &Self) -> bool {
        self.min <= other.min && other.max <= self.max
    }

    fn union(&mut self, other: &Self) {
        if other.min < self.min {
            self.min = other.min.clone();
        }
        if other.max > self.max {
            self.max = other.max.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_range_new_orders_bounds() {
        let range = KeyRange::new(9, 3);
        assert_eq!(range.min, 3);
        assert_eq!(range.max, 9);
    }

    #[test]
    fn key_range_overlap_and_containment() {
        let a = KeyRange::new(1, 10);
        let b = KeyRange::new(5, 15);
        let c = KeyRange::new(11, 12);

        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
        assert!(b.contains(&c));
        assert!(!a.contains(&b));
        assert!(a.contains(&KeyRange::point(10)));
        assert!(KeyRange::point(10).overlaps(&a));
    }

    #[test]
    fn key_range_union_is_monotone() {
        let mut a = KeyRange::new(4, 6);
        a.union(&KeyRange::point(1));
        a.union(&KeyRange::new(5, 20));
        assert_eq!(a, KeyRange::new(1, 20));
        assert!(a.contains(&KeyRange::new(4, 6)));
    }

    #[test]
    fn union_all_of_empty_is_none() {
        let empty: Vec<KeyRange<i32>> = Vec::new();
        assert!(union_all(&empty).is_none());

        let ranges = vec![KeyRange::point(3), KeyRange::point(-2), KeyRange::new(0, 1)];
        assert_eq!(union_all(&ranges), Some(KeyRange::new(-2, 3)));
    }
}
