//! Multiversion tree whose entries expire at a version fixed on insertion.
//!
//! Each live non-root leaf is tracked with its underflow version: the
//! `d`-th largest delete version among its live entries, `d` being the
//! minimum leaf capacity. Past that version the leaf breaks the weak version
//! condition. The tracking records live in a map keyed by node id and in a
//! [`NotifyHeap`] ordered by underflow version; the map keeps each record's
//! heap position so a leaf that dies can be dropped from the heap directly.
//!
//! Moving the version forward (and every insertion) first repairs the leaves
//! that are due, which is how expired entries leave the live tree.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::RangeBounds;

use super::config::MvbtConfig;
use super::lifespan::{Lifespan, MvEntry};
use super::mvbt::{Mvbt, MvNode};
use super::notify_heap::{HeapObserver, NotifyHeap};
use super::root_history::RootRecord;
use super::Version;
use crate::btree::{BTreeKey, BTreeValue};
use crate::container::{Container, PageId};
use crate::errors::{PageTreeError, PageTreeResult};
use crate::tree::TreeReport;

/// Tracking record of one leaf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeafInfo<K> {
    pub id: PageId,
    /// Key inside the leaf's interval, used to find the leaf again
    pub key: K,
    pub underflow_version: Version,
    #[serde(skip)]
    pos: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Expiry {
    version: Version,
    id: PageId,
}

impl<K> HeapObserver<Expiry> for HashMap<PageId, LeafInfo<K>> {
    fn moved(&mut self, item: &Expiry, pos: usize) {
        if let Some(info) = self.get_mut(&item.id) {
            info.pos = pos;
        }
    }
}

pub(crate) struct LeafTracker<K> {
    infos: HashMap<PageId, LeafInfo<K>>,
    heap: NotifyHeap<Expiry>,
}

impl<K> Default for LeafTracker<K> {
    fn default() -> Self {
        Self {
            infos: HashMap::new(),
            heap: NotifyHeap::new(),
        }
    }
}

impl<K: Clone> LeafTracker<K> {
    pub(crate) fn from_infos(infos: Vec<LeafInfo<K>>) -> Self {
        let mut tracker = Self::default();
        for info in infos {
            tracker.track(info.id, info.key, info.underflow_version);
        }
        tracker
    }

    pub(crate) fn infos(&self) -> Vec<LeafInfo<K>> {
        self.infos.values().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.infos.len()
    }

    /// Adds or refreshes the record of leaf `id`.
    pub(crate) fn track(&mut self, id: PageId, key: K, version: Version) {
        let expiry = Expiry { version, id };
        match self.infos.get_mut(&id) {
            Some(info) => {
                info.key = key;
                info.underflow_version = version;
                let pos = info.pos;
                self.heap.replace_at(pos, expiry, &mut self.infos);
            }
            None => {
                self.infos.insert(
                    id,
                    LeafInfo {
                        id,
                        key,
                        underflow_version: version,
                        pos: usize::MAX,
                    },
                );
                self.heap.push(expiry, &mut self.infos);
            }
        }
    }

    pub(crate) fn untrack(&mut self, id: PageId) -> PageTreeResult<Option<LeafInfo<K>>> {
        let info = match self.infos.remove(&id) {
            Some(info) => info,
            None => return Ok(None),
        };
        match self.heap.remove_at(info.pos, &mut self.infos) {
            Some(expiry) if expiry.id == id => Ok(Some(info)),
            other => Err(PageTreeError::invariant(&format!(
                "heap position {} of leaf {} holds {:?}",
                info.pos, id, other
            ))),
        }
    }

    /// The earliest record due by `target`.
    pub(crate) fn next_due(&self, target: Version) -> Option<(Version, PageId, K)> {
        let next = self.heap.peek().filter(|e| e.version <= target)?;
        let info = self.infos.get(&next.id)?;
        Some((next.version, next.id, info.key.clone()))
    }

    /// Map and heap must agree in size, positions and versions, and the
    /// heap must be ordered.
    pub(crate) fn check(&self) -> PageTreeResult<()> {
        if self.infos.len() != self.heap.len() {
            return Err(PageTreeError::invariant(&format!(
                "leaf map tracks {} leaves but the expiry heap holds {}",
                self.infos.len(),
                self.heap.len()
            )));
        }
        if !self.heap.is_valid() {
            return Err(PageTreeError::invariant("expiry heap is out of order"));
        }
        for (pos, expiry) in self.heap.iter().enumerate() {
            let info = self.infos.get(&expiry.id).ok_or_else(|| {
                PageTreeError::invariant(&format!("leaf {} is in the heap only", expiry.id))
            })?;
            if info.pos != pos || info.underflow_version != expiry.version {
                return Err(PageTreeError::invariant(&format!(
                    "record of leaf {} says position {} version {}, heap says {} and {}",
                    expiry.id, info.pos, info.underflow_version, pos, expiry.version
                )));
            }
        }
        Ok(())
    }
}

/// Version at which a leaf with `entries` drops below `min` live entries:
/// `now` if it already has fewer, `None` if it never will.
pub(crate) fn underflow_version<K, V>(
    entries: &[MvEntry<K, V>],
    min: usize,
    now: Version,
) -> Option<Version> {
    let mut ends: Vec<Version> = entries
        .iter()
        .filter(|e| e.lifespan.alive_at(now))
        .map(|e| e.lifespan.end.unwrap_or(Version::MAX))
        .collect();
    if ends.len() < min {
        return Some(now);
    }
    ends.sort_unstable_by(|a, b| b.cmp(a));
    match ends.get(min.checked_sub(1)?) {
        Some(&Version::MAX) | None => None,
        Some(&version) => Some(version),
    }
}

/// Multiversion tree with entries that expire on their own.
///
/// Entries are inserted together with their delete version and leave only
/// through it: explicit removal and update are rejected.
///
/// # Examples
///
/// ```rust
/// use pagetree::container::MemoryContainer;
/// use pagetree::mvbt::{AutoDeleteMvbt, MvbtConfig};
/// use pagetree::tree::Capacity;
///
/// let config = MvbtConfig::new(Capacity::new(2, 8).unwrap(), 0u32);
/// let tree = AutoDeleteMvbt::new(MemoryContainer::new(), config).unwrap();
/// tree.insert(1, 'a', 3).unwrap();
/// tree.advance_to(3).unwrap();
///
/// assert_eq!(tree.get(&1, 2).unwrap(), Some('a'));
/// assert_eq!(tree.get(&1, 3).unwrap(), None);
/// assert!(tree.remove(&1).is_err());
/// ```
pub struct AutoDeleteMvbt<K: BTreeKey, V: BTreeValue, C> {
    tree: Mvbt<K, V, C>,
}

impl<K, V, C> AutoDeleteMvbt<K, V, C>
where
    K: BTreeKey,
    V: BTreeValue,
    C: Container<MvNode<K, V>>,
{
    pub fn new(container: C, config: MvbtConfig<K>) -> PageTreeResult<Self> {
        Ok(Self {
            tree: Mvbt::create(container, config, true)?,
        })
    }

    pub fn open(container: C, config: MvbtConfig<K>) -> PageTreeResult<Self> {
        Ok(Self {
            tree: Mvbt::restore(container, config, true)?,
        })
    }

    pub fn flush(&self) -> PageTreeResult<()> {
        self.tree.flush()
    }

    pub fn container(&self) -> &C {
        self.tree.container()
    }

    pub fn now(&self) -> Version {
        self.tree.now()
    }

    pub fn height(&self) -> u32 {
        self.tree.height()
    }

    pub fn live_root(&self) -> Option<RootRecord<K>> {
        self.tree.live_root()
    }

    pub fn root_history(&self) -> Vec<RootRecord<K>> {
        self.tree.root_history()
    }

    /// Inserts `key` at the current version; it expires at `delete_version`.
    pub fn insert(&self, key: K, value: V, delete_version: Version) -> PageTreeResult<()> {
        let mut state = self.tree.state.write();
        let now = state.now;
        let lifespan = Lifespan::bounded(now, delete_version)?;
        self.tree.drain_expired(&mut state, now)?;
        self.tree
            .insert_locked(&mut state, MvEntry::new(key, value, lifespan))
    }

    /// Always fails: entries need a delete version.
    pub fn insert_unbounded(&self, key: K, _value: V) -> PageTreeResult<()> {
        Err(PageTreeError::unsupported(&format!(
            "auto-delete tree needs a delete version to insert {:?}",
            key
        )))
    }

    /// Always fails: entries leave at their delete version.
    pub fn remove(&self, key: &K) -> PageTreeResult<Option<V>> {
        Err(PageTreeError::unsupported(&format!(
            "auto-delete tree cannot remove {:?} explicitly",
            key
        )))
    }

    /// Always fails: entries leave at their delete version.
    pub fn update(&self, key: K, _value: V) -> PageTreeResult<Option<V>> {
        Err(PageTreeError::unsupported(&format!(
            "auto-delete tree cannot update {:?}",
            key
        )))
    }

    /// Moves the current version forward, repairing every leaf whose
    /// underflow version is reached on the way.
    pub fn advance_to(&self, version: Version) -> PageTreeResult<()> {
        self.tree.advance_to(version)
    }

    pub fn get(&self, key: &K, version: Version) -> PageTreeResult<Option<V>> {
        self.tree.get(key, version)
    }

    pub fn range<R>(&self, range: R, version: Version) -> PageTreeResult<Vec<(K, V)>>
    where
        R: RangeBounds<K>,
    {
        self.tree.range(range, version)
    }

    pub fn len_at(&self, version: Version) -> PageTreeResult<usize> {
        self.tree.len_at(version)
    }

    /// Number of leaves with a pending underflow version.
    pub fn tracked_leaves(&self) -> usize {
        self.tree
            .state
            .read()
            .tracker
            .as_ref()
            .map_or(0, |tracker| tracker.len())
    }

    /// Verifies the expiry tracking alone.
    pub fn check_heap(&self) -> PageTreeResult<()> {
        match &self.tree.state.read().tracker {
            Some(tracker) => tracker.check(),
            None => Err(PageTreeError::invariant("auto-delete tree has no expiry tracking")),
        }
    }

    pub fn check(&self) -> PageTreeResult<TreeReport> {
        self.tree.check()
    }
}
