use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use super::Version;
use crate::btree::{BTreeKey, BTreeValue};
use crate::descriptor::Descriptor;
use crate::errors::{ErrorKind, PageTreeError, PageTreeResult};

/// Half-open version interval `[begin, end)`; `end == None` means the
/// interval is still open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Lifespan {
    pub begin: Version,
    pub end: Option<Version>,
}

impl Lifespan {
    /// Open lifespan starting at `begin`.
    pub fn starting(begin: Version) -> Self {
        Self { begin, end: None }
    }

    /// Closed lifespan; `end` must lie after `begin`.
    pub fn bounded(begin: Version, end: Version) -> PageTreeResult<Self> {
        if end <= begin {
            return Err(PageTreeError::new(
                &format!("lifespan [{}, {}) is empty", begin, end),
                ErrorKind::InvalidOperation,
            ));
        }
        Ok(Self {
            begin,
            end: Some(end),
        })
    }

    pub fn is_alive(&self) -> bool {
        self.end.is_none()
    }

    pub fn alive_at(&self, version: Version) -> bool {
        self.begin <= version && self.end.map_or(true, |end| version < end)
    }

    pub fn overlaps(&self, other: &Lifespan) -> bool {
        let self_before_other_ends = other.end.map_or(true, |end| self.begin < end);
        let other_before_self_ends = self.end.map_or(true, |end| other.begin < end);
        self_before_other_ends && other_before_self_ends
    }

    pub fn contains(&self, other: &Lifespan) -> bool {
        let ends_later = match (self.end, other.end) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(a), Some(b)) => b <= a,
        };
        self.begin <= other.begin && ends_later
    }

    pub fn union(&mut self, other: &Lifespan) {
        self.begin = self.begin.min(other.begin);
        self.end = match (self.end, other.end) {
            (Some(a), Some(b)) => Some(a.max(b)),
            _ => None,
        };
    }
}

/// Multiversion region: the key interval `[min_key, max_key)` (`None` is
/// unbounded) over a lifespan.
///
/// Index entries of a multiversion tree carry the region of their child; the
/// live children of a node partition the node's key interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MvRegion<K> {
    pub min_key: K,
    pub max_key: Option<K>,
    pub lifespan: Lifespan,
}

impl<K: Ord + Clone> MvRegion<K> {
    pub fn new(min_key: K, max_key: Option<K>, lifespan: Lifespan) -> Self {
        Self {
            min_key,
            max_key,
            lifespan,
        }
    }

    pub fn contains_key(&self, key: &K) -> bool {
        &self.min_key <= key && self.max_key.as_ref().map_or(true, |max| key < max)
    }

    /// Does the key interval share a key with the closed interval `[lo, hi]`?
    pub fn overlaps_keys(&self, lo: &K, hi: &K) -> bool {
        &self.min_key <= hi && self.max_key.as_ref().map_or(true, |max| lo < max)
    }

    fn keys_overlap(&self, other: &Self) -> bool {
        let below_other_max = other.max_key.as_ref().map_or(true, |max| &self.min_key < max);
        let other_below_max = self.max_key.as_ref().map_or(true, |max| &other.min_key < max);
        below_other_max && other_below_max
    }

    fn keys_contain(&self, other: &Self) -> bool {
        let max_ok = match (&self.max_key, &other.max_key) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(a), Some(b)) => b <= a,
        };
        self.min_key <= other.min_key && max_ok
    }

    /// Widens the key interval to cover `other`'s, leaving the lifespan alone.
    pub fn union_keys(&mut self, other: &Self) {
        if other.min_key < self.min_key {
            self.min_key = other.min_key.clone();
        }
        self.max_key = match (self.max_key.take(), &other.max_key) {
            (Some(a), Some(b)) => Some(if *b > a { b.clone() } else { a }),
            _ => None,
        };
    }
}

impl<K> Descriptor for MvRegion<K>
where
    K: Ord + Clone + Debug + Serialize + serde::de::DeserializeOwned,
{
    fn overlaps(&self, other: &Self) -> bool {
        self.keys_overlap(other) && self.lifespan.overlaps(&other.lifespan)
    }

    fn contains(&self, other: &Self) -> bool {
        self.keys_contain(other) && self.lifespan.contains(&other.lifespan)
    }

    fn union(&mut self, other: &Self) {
        self.union_keys(other);
        self.lifespan.union(&other.lifespan);
    }
}

/// Leaf entry of a multiversion tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MvEntry<K, V> {
    pub key: K,
    pub value: V,
    pub lifespan: Lifespan,
}

impl<K: BTreeKey, V: BTreeValue> MvEntry<K, V> {
    pub fn new(key: K, value: V, lifespan: Lifespan) -> Self {
        Self {
            key,
            value,
            lifespan,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifespan_alive_at() {
        let open = Lifespan::starting(3);
        assert!(!open.alive_at(2));
        assert!(open.alive_at(3));
        assert!(open.alive_at(1_000));
        assert!(open.is_alive());

        let closed = Lifespan::bounded(3, 5).unwrap();
        assert!(closed.alive_at(4));
        assert!(!closed.alive_at(5));
        assert!(!closed.is_alive());
        assert!(Lifespan::bounded(5, 5).is_err());
    }

    #[test]
    fn test_lifespan_overlap_and_union() {
        let a = Lifespan::bounded(0, 5).unwrap();
        let b = Lifespan::bounded(5, 9).unwrap();
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&Lifespan::starting(4)));

        let mut u = a;
        u.union(&b);
        assert_eq!(u, Lifespan::bounded(0, 9).unwrap());
        assert!(u.contains(&a) && u.contains(&b));
        u.union(&Lifespan::starting(7));
        assert!(u.is_alive());
    }

    #[test]
    fn test_region_keys() {
        let region = MvRegion::new(10, Some(20), Lifespan::starting(0));
        assert!(region.contains_key(&10));
        assert!(!region.contains_key(&20));
        assert!(region.overlaps_keys(&0, &10));
        assert!(!region.overlaps_keys(&20, &30));

        let mut wide = region.clone();
        wide.union_keys(&MvRegion::new(20, None, Lifespan::starting(4)));
        assert_eq!(wide.max_key, None);
        assert_eq!(wide.lifespan, Lifespan::starting(0));
        assert!(wide.contains(&region));
    }
}
