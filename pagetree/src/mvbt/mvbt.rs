use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::marker::PhantomData;
use std::ops::RangeBounds;

use super::auto_delete::{underflow_version, LeafInfo, LeafTracker};
use super::config::MvbtConfig;
use super::lifespan::{Lifespan, MvEntry, MvRegion};
use super::root_history::{RootHistory, RootRecord};
use super::Version;
use crate::btree::{BTreeKey, BTreeValue, KeyBounds};
use crate::container::{Container, PageId};
use crate::errors::{ErrorKind, PageTreeError, PageTreeResult};
use crate::tree::{Frame, IndexEntry, Node, Path, TreeReport};

/// Node type stored by a multiversion tree.
pub type MvNode<K, V> = Node<MvEntry<K, V>, MvRegion<K>>;

type MvFrame<K, V> = Frame<MvEntry<K, V>, MvRegion<K>>;
type MvPath<'a, K, V, C> = Path<'a, C, MvEntry<K, V>, MvRegion<K>>;

/// Tree state persisted through the container metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MvbtMeta<K> {
    roots: RootHistory<K>,
    now: Version,
    leaves: Vec<LeafInfo<K>>,
}

pub(crate) struct MvbtState<K> {
    pub(crate) roots: RootHistory<K>,
    pub(crate) now: Version,
    /// Expiry tracking of the auto-delete variant
    pub(crate) tracker: Option<LeafTracker<K>>,
}

/// Multiversion B-tree.
///
/// Every mutation happens at the current version, which only moves forward
/// ([`advance_to`](Self::advance_to)). Entries are never overwritten: a removal
/// closes the lifespan of the live entry, so any past version can still be
/// queried. Live keys are unique.
///
/// Nodes that overflow, or drop below the minimum number of live entries, are
/// replaced by copies holding only their live entries (version split). A copy
/// with too many live entries is split by key; one with too few is merged with
/// a copy of a live sibling. The replaced node stays in the container as
/// history. Every root the tree ever had is kept in a [`RootHistory`].
///
/// # Examples
///
/// ```rust
/// use pagetree::container::MemoryContainer;
/// use pagetree::mvbt::{Mvbt, MvbtConfig};
/// use pagetree::tree::Capacity;
///
/// let config = MvbtConfig::new(Capacity::new(2, 8).unwrap(), 0u32);
/// let tree = Mvbt::new(MemoryContainer::new(), config).unwrap();
/// tree.insert(7, "seven".to_string()).unwrap();
/// tree.advance_to(5).unwrap();
/// tree.remove(&7).unwrap();
///
/// assert_eq!(tree.get(&7, 4).unwrap(), Some("seven".to_string()));
/// assert_eq!(tree.get(&7, 5).unwrap(), None);
/// ```
pub struct Mvbt<K: BTreeKey, V: BTreeValue, C> {
    pub(crate) container: C,
    pub(crate) config: MvbtConfig<K>,
    pub(crate) state: RwLock<MvbtState<K>>,
    _values: PhantomData<fn() -> V>,
}

impl<K, V, C> Mvbt<K, V, C>
where
    K: BTreeKey,
    V: BTreeValue,
    C: Container<MvNode<K, V>>,
{
    /// Creates an empty tree at version 0.
    pub fn new(container: C, config: MvbtConfig<K>) -> PageTreeResult<Self> {
        Self::create(container, config, false)
    }

    /// Opens the tree persisted in `container` by an earlier [`flush`](Self::flush).
    pub fn open(container: C, config: MvbtConfig<K>) -> PageTreeResult<Self> {
        Self::restore(container, config, false)
    }

    pub(crate) fn create(
        container: C,
        config: MvbtConfig<K>,
        track_expiry: bool,
    ) -> PageTreeResult<Self> {
        config.validate()?;
        let state = MvbtState {
            roots: RootHistory::default(),
            now: 0,
            tracker: track_expiry.then(LeafTracker::default),
        };
        Ok(Self {
            container,
            config,
            state: RwLock::new(state),
            _values: PhantomData,
        })
    }

    pub(crate) fn restore(
        container: C,
        config: MvbtConfig<K>,
        track_expiry: bool,
    ) -> PageTreeResult<Self> {
        let meta = match container.metadata()? {
            Some(bytes) => {
                let (meta, _): (MvbtMeta<K>, usize) =
                    bincode::serde::decode_from_slice(&bytes, bincode::config::legacy())?;
                Some(meta)
            }
            None => None,
        };
        let tree = Self::create(container, config, track_expiry)?;
        if let Some(meta) = meta {
            log::debug!(
                "Opened multiversion tree at version {} with {} roots",
                meta.now,
                meta.roots.len()
            );
            let mut state = tree.state.write();
            state.roots = meta.roots;
            state.now = meta.now;
            if track_expiry {
                state.tracker = Some(LeafTracker::from_infos(meta.leaves));
            }
        }
        Ok(tree)
    }

    /// Persists the root history, the current version and the expiry
    /// tracking, then flushes the container.
    pub fn flush(&self) -> PageTreeResult<()> {
        let bytes = {
            let state = self.state.read();
            let meta = MvbtMeta {
                roots: state.roots.clone(),
                now: state.now,
                leaves: state
                    .tracker
                    .as_ref()
                    .map(|tracker| tracker.infos())
                    .unwrap_or_default(),
            };
            bincode::serde::encode_to_vec(&meta, bincode::config::legacy())?
        };
        self.container.set_metadata(&bytes)?;
        self.container.flush()
    }

    pub fn config(&self) -> &MvbtConfig<K> {
        &self.config
    }

    pub fn container(&self) -> &C {
        &self.container
    }

    /// The current version.
    pub fn now(&self) -> Version {
        self.state.read().now
    }

    /// Height of the live tree (0 before the first insertion).
    pub fn height(&self) -> u32 {
        self.state
            .read()
            .roots
            .live()
            .map_or(0, |root| root.parent_level)
    }

    pub fn live_root(&self) -> Option<RootRecord<K>> {
        self.state.read().roots.live().cloned()
    }

    /// Every root the tree had, oldest first.
    pub fn root_history(&self) -> Vec<RootRecord<K>> {
        self.state.read().roots.records().to_vec()
    }

    /// Moves the current version forward.
    pub fn advance_to(&self, version: Version) -> PageTreeResult<()> {
        let mut state = self.state.write();
        self.advance_locked(&mut state, version)
    }

    pub(crate) fn advance_locked(
        &self,
        state: &mut MvbtState<K>,
        version: Version,
    ) -> PageTreeResult<()> {
        if version < state.now {
            return Err(PageTreeError::new(
                &format!(
                    "version {} is before the current version {}",
                    version, state.now
                ),
                ErrorKind::InvalidOperation,
            ));
        }
        self.drain_expired(state, version)?;
        state.now = version;
        Ok(())
    }

    /// Inserts `key` at the current version. Fails if the key is live.
    pub fn insert(&self, key: K, value: V) -> PageTreeResult<()> {
        let mut state = self.state.write();
        let now = state.now;
        self.insert_locked(&mut state, MvEntry::new(key, value, Lifespan::starting(now)))
    }

    /// Ends the lifespan of the live entry with `key` at the current version.
    pub fn remove(&self, key: &K) -> PageTreeResult<Option<V>> {
        let mut state = self.state.write();
        self.remove_locked(&mut state, key)
    }

    /// Replaces the value of a live key at the current version. Returns the
    /// old value, or `None` (and changes nothing) when the key is not live.
    pub fn update(&self, key: K, value: V) -> PageTreeResult<Option<V>> {
        let mut state = self.state.write();
        let old = match self.remove_locked(&mut state, &key)? {
            Some(old) => old,
            None => return Ok(None),
        };
        let now = state.now;
        self.insert_locked(&mut state, MvEntry::new(key, value, Lifespan::starting(now)))?;
        Ok(Some(old))
    }

    /// Value of `key` at `version`.
    pub fn get(&self, key: &K, version: Version) -> PageTreeResult<Option<V>> {
        Ok(self
            .range(key.clone()..=key.clone(), version)?
            .into_iter()
            .next()
            .map(|(_, value)| value))
    }

    /// Entries with keys in `range` that were alive at `version`, ascending.
    pub fn range<R>(&self, range: R, version: Version) -> PageTreeResult<Vec<(K, V)>>
    where
        R: RangeBounds<K>,
    {
        let state = self.state.read();
        let root = match state.roots.at(version) {
            Some(root) => root.id,
            None => return Ok(Vec::new()),
        };
        let bounds = KeyBounds::new(range);

        let mut found = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            match self.container.get(id, true)? {
                Node::Leaf { entries } => found.extend(
                    entries
                        .into_iter()
                        .filter(|e| e.lifespan.alive_at(version) && bounds.contains(&e.key))
                        .map(|e| (e.key, e.value)),
                ),
                Node::Internal { children, .. } => stack.extend(
                    children
                        .into_iter()
                        .filter(|c| {
                            c.descriptor.lifespan.alive_at(version)
                                && region_meets(&c.descriptor, &bounds)
                        })
                        .map(|c| c.id),
                ),
            }
        }
        found.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(found)
    }

    /// Number of entries alive at `version`.
    pub fn len_at(&self, version: Version) -> PageTreeResult<usize> {
        Ok(self.range(.., version)?.len())
    }

    /// Every value `key` ever had, with its lifespan, oldest first.
    pub fn history(&self, key: &K) -> PageTreeResult<Vec<(Lifespan, V)>> {
        let state = self.state.read();
        let mut visited = HashSet::new();
        let mut stack: Vec<PageId> = state.roots.records().iter().map(|r| r.id).collect();
        let mut versions: BTreeMap<Version, (Lifespan, V)> = BTreeMap::new();

        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            match self.container.get(id, true)? {
                Node::Leaf { entries } => {
                    for entry in entries.into_iter().filter(|e| &e.key == key) {
                        // copies agree on begin; only the last copy knows the end
                        let known = versions.get(&entry.lifespan.begin);
                        if known.map_or(true, |(span, _)| span.end.is_none()) {
                            versions.insert(entry.lifespan.begin, (entry.lifespan, entry.value));
                        }
                    }
                }
                Node::Internal { children, .. } => stack.extend(
                    children
                        .into_iter()
                        .filter(|c| c.descriptor.contains_key(key))
                        .map(|c| c.id),
                ),
            }
        }
        Ok(versions.into_values().collect())
    }

    /// Verifies the live tree and the root history.
    ///
    /// Checks levels, capacity, the weak version condition, that the live
    /// children of every node partition its key interval, that live keys are
    /// unique and lie inside their leaf's interval, and the expiry tracking of
    /// the auto-delete variant.
    pub fn check(&self) -> PageTreeResult<TreeReport> {
        let state = self.state.read();
        state.roots.check()?;
        for record in state.roots.records() {
            if !self.container.contains(record.id) {
                return Err(PageTreeError::invariant(&format!(
                    "root {} of version {} is missing from the container",
                    record.id, record.region.lifespan.begin
                )));
            }
        }
        if let Some(tracker) = &state.tracker {
            tracker.check()?;
        }

        let root = match state.roots.live() {
            Some(root) => root.clone(),
            None => {
                return Ok(TreeReport {
                    height: 0,
                    nodes_per_level: Vec::new(),
                    entries: 0,
                })
            }
        };
        let now = state.now;
        let mut report = TreeReport {
            height: root.parent_level,
            nodes_per_level: vec![0; root.parent_level as usize],
            entries: 0,
        };

        let mut stack = vec![(root.entry(), true)];
        while let Some((entry, is_root)) = stack.pop() {
            let node = self.container.get(entry.id, true)?;
            let level = node.level();
            if level != entry.child_level() {
                return Err(PageTreeError::invariant(&format!(
                    "node {} is on level {} but its entry expects level {}",
                    entry.id,
                    level,
                    entry.child_level()
                )));
            }
            match report.nodes_per_level.get_mut(level as usize) {
                Some(count) => *count += 1,
                None => {
                    return Err(PageTreeError::invariant(&format!(
                        "node {} is above the root level",
                        entry.id
                    )))
                }
            }

            let bounds = self.config.capacity.bounds(level);
            let live = live_count(&node, now);
            if node.len() > bounds.max {
                return Err(PageTreeError::invariant(&format!(
                    "node {} holds {} entries, maximum is {}",
                    entry.id,
                    node.len(),
                    bounds.max
                )));
            }
            if !is_root && live < bounds.min {
                return Err(PageTreeError::invariant(&format!(
                    "node {} has {} live entries at version {}, weak minimum is {}",
                    entry.id, live, now, bounds.min
                )));
            }

            let region = &entry.descriptor;
            match node {
                Node::Leaf { entries } => {
                    let mut keys = Vec::with_capacity(live);
                    for e in &entries {
                        check_lifespan(&e.lifespan, entry.id)?;
                        if !e.lifespan.alive_at(now) {
                            continue;
                        }
                        if !region.contains_key(&e.key) {
                            return Err(PageTreeError::invariant(&format!(
                                "live key {:?} lies outside the interval of leaf {}",
                                e.key, entry.id
                            )));
                        }
                        keys.push(&e.key);
                    }
                    keys.sort();
                    if let Some(pair) = keys.windows(2).find(|w| w[0] == w[1]) {
                        return Err(PageTreeError::invariant(&format!(
                            "key {:?} is live twice in leaf {}",
                            pair[0], entry.id
                        )));
                    }
                    report.entries += keys.len() as u64;
                }
                Node::Internal { children, .. } => {
                    let mut live_children = Vec::with_capacity(live);
                    for child in &children {
                        check_lifespan(&child.descriptor.lifespan, entry.id)?;
                        if child.parent_level != level {
                            return Err(PageTreeError::invariant(&format!(
                                "entry of node {} in node {} has parent level {}, expected {}",
                                child.id, entry.id, child.parent_level, level
                            )));
                        }
                        if child.descriptor.lifespan.alive_at(now) {
                            live_children.push(child);
                        }
                    }
                    check_partition_of(region, &mut live_children, entry.id)?;
                    stack.extend(live_children.into_iter().map(|child| (child.clone(), false)));
                }
            }
        }
        Ok(report)
    }

    pub(crate) fn insert_locked(
        &self,
        state: &mut MvbtState<K>,
        entry: MvEntry<K, V>,
    ) -> PageTreeResult<()> {
        if entry.key < self.config.key_min {
            return Err(PageTreeError::new(
                &format!(
                    "key {:?} is below the key domain minimum {:?}",
                    entry.key, self.config.key_min
                ),
                ErrorKind::InvalidOperation,
            ));
        }
        let now = state.now;
        let root = match state.roots.live() {
            Some(root) => root.entry(),
            None => {
                let id = self.container.insert(&Node::leaf(vec![entry]))?;
                state.roots.replace_live(RootRecord {
                    region: self.root_region(now),
                    id,
                    parent_level: 1,
                })?;
                log::debug!("Planted root leaf {} at version {}", id, now);
                return Ok(());
            }
        };

        let mut path = self.descend_live(root, &entry.key)?;
        let frame = path.top_mut().ok_or_else(empty_path)?;
        let entries = frame
            .node
            .entries_mut()
            .ok_or_else(|| PageTreeError::invariant("descent stopped above the leaf level"))?;
        if entries
            .iter()
            .any(|e| e.key == entry.key && e.lifespan.alive_at(now))
        {
            return Err(PageTreeError::new(
                &format!("key {:?} is already live at version {}", entry.key, now),
                ErrorKind::InvalidOperation,
            ));
        }
        entries.push(entry);
        frame.dirty = true;
        self.settle(state, path)
    }

    pub(crate) fn remove_locked(
        &self,
        state: &mut MvbtState<K>,
        key: &K,
    ) -> PageTreeResult<Option<V>> {
        let now = state.now;
        let root = match state.roots.live() {
            Some(root) => root.entry(),
            None => return Ok(None),
        };
        let mut path = self.descend_live(root, key)?;
        let frame = path.top_mut().ok_or_else(empty_path)?;
        let entries = frame
            .node
            .entries_mut()
            .ok_or_else(|| PageTreeError::invariant("descent stopped above the leaf level"))?;
        let pos = match entries
            .iter()
            .position(|e| &e.key == key && e.lifespan.alive_at(now))
        {
            Some(pos) => pos,
            None => return Ok(None),
        };
        let value = if entries[pos].lifespan.begin == now {
            entries.remove(pos).value
        } else {
            entries[pos].lifespan.end = Some(now);
            entries[pos].value.clone()
        };
        frame.dirty = true;
        self.settle(state, path)?;
        Ok(Some(value))
    }

    /// Repairs the leaves whose expiry heap entry is due by `target`, oldest
    /// first, each at its own underflow version.
    pub(crate) fn drain_expired(
        &self,
        state: &mut MvbtState<K>,
        target: Version,
    ) -> PageTreeResult<usize> {
        let mut repaired = 0;
        loop {
            let (due, id, key) = match state.tracker.as_ref().and_then(|t| t.next_due(target)) {
                Some(next) => next,
                None => break,
            };
            state.now = state.now.max(due);
            let root = state.roots.live().map(|root| root.entry()).ok_or_else(|| {
                PageTreeError::invariant("expiry heap tracks a leaf of an empty tree")
            })?;

            let path = self.descend_live(root, &key)?;
            let frame = path.top().ok_or_else(empty_path)?;
            if frame.entry.id != id {
                return Err(PageTreeError::invariant(&format!(
                    "reference key {:?} leads to node {} instead of leaf {}",
                    key, frame.entry.id, id
                )));
            }
            if path.len() == 1 {
                // the root is exempt from underflow
                if let Some(tracker) = state.tracker.as_mut() {
                    tracker.untrack(id)?;
                }
                path.close()?;
                continue;
            }
            self.settle(state, path)?;
            repaired += 1;
        }
        if repaired > 0 {
            log::debug!(
                "Auto-delete sweep repaired {} leaves up to version {}",
                repaired,
                target
            );
        }
        Ok(repaired)
    }

    fn root_region(&self, now: Version) -> MvRegion<K> {
        MvRegion::new(self.config.key_min.clone(), None, Lifespan::starting(now))
    }

    /// Path from the live root to the live leaf whose interval holds `key`.
    fn descend_live(
        &self,
        root: IndexEntry<MvRegion<K>>,
        key: &K,
    ) -> PageTreeResult<MvPath<'_, K, V, C>> {
        let mut path = Path::new(&self.container);
        path.push(root, None)?;
        loop {
            let frame = path.top().ok_or_else(empty_path)?;
            if frame.node.is_leaf() {
                return Ok(path);
            }
            let next = frame
                .node
                .children()
                .iter()
                .enumerate()
                .find(|(_, c)| c.descriptor.lifespan.is_alive() && c.descriptor.contains_key(key))
                .map(|(idx, c)| (idx, c.clone()));
            match next {
                Some((idx, child)) => path.push(child, Some(idx))?,
                None => {
                    return Err(PageTreeError::invariant(&format!(
                        "no live child of node {} covers key {:?}",
                        frame.entry.id, key
                    )))
                }
            }
        }
    }

    /// Walks up the path from the changed node, running structure changes
    /// until a node satisfies the capacity and the weak version condition.
    fn settle(&self, state: &mut MvbtState<K>, mut path: MvPath<'_, K, V, C>) -> PageTreeResult<()> {
        let now = state.now;
        loop {
            let frame = path.top().ok_or_else(empty_path)?;
            let level = frame.node.level();
            let bounds = *self.config.capacity.bounds(level);
            let is_root = path.len() == 1;
            let live = live_count(&frame.node, now);

            let overflow = frame.node.len() > bounds.max;
            let underflow = !is_root && live < bounds.min;
            let lone_child = is_root && level > 0 && live <= 1;
            if !(overflow || underflow || lone_child) {
                if frame.node.is_leaf() && !is_root {
                    self.track_leaf(state, frame.entry.id, &frame.entry.descriptor, &frame.node)?;
                }
                return path.close();
            }

            let frame = path.take().ok_or_else(empty_path)?;
            self.restructure(state, &mut path, frame)?;
            if path.is_empty() {
                return Ok(());
            }
        }
    }

    /// Version-splits the node of `frame` at the current version and links
    /// the result into the parent on top of `path`, or into the root history.
    fn restructure(
        &self,
        state: &mut MvbtState<K>,
        path: &mut MvPath<'_, K, V, C>,
        frame: MvFrame<K, V>,
    ) -> PageTreeResult<()> {
        let now = state.now;
        let level = frame.node.level();
        let strong = self.config.strong_bounds(level);
        let is_root = path.is_empty();
        let node_id = frame.entry.id;
        let node_idx = frame.child_idx;
        let mut region = frame.entry.descriptor.clone();
        let mut live = live_copy(&frame.node, now);
        self.retire(state, frame)?;

        if is_root && level > 0 && live.len() <= 1 {
            return self.collapse_root(state, live);
        }

        let mut sibling_idx = None;
        if !is_root && live.len() < strong.min {
            let parent = path.top().ok_or_else(empty_path)?;
            if let Some((idx, sibling)) = find_sibling(parent.node.children(), &region, node_id) {
                let node = self.container.get(sibling.id, false)?;
                absorb(&mut live, live_copy(&node, now))?;
                region.union_keys(&sibling.descriptor);
                log::debug!(
                    "Strong merge of node {} with sibling {} on level {} at version {}",
                    node_id,
                    sibling.id,
                    level,
                    now
                );
                self.retire(
                    state,
                    Frame {
                        entry: sibling,
                        node,
                        child_idx: Some(idx),
                        dirty: false,
                    },
                )?;
                sibling_idx = Some(idx);
            }
        }

        sort_by_key(&mut live);
        let parts = if live.len() > strong.max {
            let at = live.len() / 2;
            let right = split_off(&mut live, at);
            let split_key = first_key(&right)
                .cloned()
                .ok_or_else(|| PageTreeError::invariant("key split produced an empty half"))?;
            log::debug!(
                "Key split of node {} on level {} at key {:?}, version {}",
                node_id,
                level,
                split_key,
                now
            );
            vec![
                (
                    live,
                    MvRegion::new(region.min_key, Some(split_key.clone()), Lifespan::starting(now)),
                ),
                (
                    right,
                    MvRegion::new(split_key, region.max_key, Lifespan::starting(now)),
                ),
            ]
        } else {
            log::trace!("Version split of node {} at version {}", node_id, now);
            vec![(
                live,
                MvRegion::new(region.min_key, region.max_key, Lifespan::starting(now)),
            )]
        };

        let becomes_root = is_root && parts.len() == 1;
        let mut created = Vec::with_capacity(parts.len());
        for (node, region) in parts {
            let id = self.container.insert(&node)?;
            if node.is_leaf() && !becomes_root {
                self.track_leaf(state, id, &region, &node)?;
            }
            created.push(IndexEntry::new(id, region, level + 1));
        }

        if is_root {
            let record = if becomes_root {
                let entry = created.remove(0);
                RootRecord {
                    region: self.root_region(now),
                    id: entry.id,
                    parent_level: level + 1,
                }
            } else {
                let id = self.container.insert(&Node::internal(created, level + 1))?;
                log::debug!("Root grew to height {} at version {}", level + 2, now);
                RootRecord {
                    region: self.root_region(now),
                    id,
                    parent_level: level + 2,
                }
            };
            return state.roots.replace_live(record);
        }

        let parent = path.top_mut().ok_or_else(empty_path)?;
        let children = parent
            .node
            .children_mut()
            .ok_or_else(|| PageTreeError::invariant("parent of a restructured node is a leaf"))?;
        let mut removed = Vec::with_capacity(2);
        for idx in [node_idx, sibling_idx].into_iter().flatten() {
            let child = children.get_mut(idx).ok_or_else(|| {
                PageTreeError::invariant(&format!("child position {} is out of range", idx))
            })?;
            if child.descriptor.lifespan.begin == now {
                removed.push(idx);
            } else {
                child.descriptor.lifespan.end = Some(now);
            }
        }
        removed.sort_unstable_by(|a, b| b.cmp(a));
        for idx in removed {
            children.remove(idx);
        }
        children.extend(created);
        parent.dirty = true;
        Ok(())
    }

    /// Replaces a root with at most one live child by a copy of that child.
    fn collapse_root(&self, state: &mut MvbtState<K>, root: MvNode<K, V>) -> PageTreeResult<()> {
        let now = state.now;
        let mut child = root
            .children()
            .first()
            .cloned()
            .ok_or_else(|| PageTreeError::invariant("index root has no live child"))?;
        loop {
            let node = self.container.get(child.id, false)?;
            let copy = live_copy(&node, now);
            self.retire(
                state,
                Frame {
                    entry: child,
                    node,
                    child_idx: None,
                    dirty: false,
                },
            )?;
            if !copy.is_leaf() && copy.len() == 1 {
                child = copy.children()[0].clone();
                continue;
            }

            let level = copy.level();
            let id = self.container.insert(&copy)?;
            log::debug!(
                "Root shrank to height {} at version {}",
                level + 1,
                now
            );
            return state.roots.replace_live(RootRecord {
                region: self.root_region(now),
                id,
                parent_level: level + 1,
            });
        }
    }

    /// Ends the node's life at the current version. A node born at this
    /// version is removed; any other node keeps its history minus the
    /// entries born at this version, which only its successors hold.
    fn retire(&self, state: &mut MvbtState<K>, mut frame: MvFrame<K, V>) -> PageTreeResult<()> {
        let now = state.now;
        let id = frame.entry.id;
        if frame.node.is_leaf() {
            if let Some(tracker) = state.tracker.as_mut() {
                tracker.untrack(id)?;
            }
        }
        if frame.entry.descriptor.lifespan.begin == now {
            return self.container.remove(id);
        }
        match &mut frame.node {
            Node::Leaf { entries } => entries.retain(|e| e.lifespan.begin != now),
            Node::Internal { children, .. } => {
                children.retain(|c| c.descriptor.lifespan.begin != now)
            }
        }
        self.container.update(id, &frame.node, true)
    }

    fn track_leaf(
        &self,
        state: &mut MvbtState<K>,
        id: PageId,
        region: &MvRegion<K>,
        node: &MvNode<K, V>,
    ) -> PageTreeResult<()> {
        let now = state.now;
        if let Some(tracker) = state.tracker.as_mut() {
            match underflow_version(node.entries(), self.config.capacity.leaf.min, now) {
                Some(version) => tracker.track(id, region.min_key.clone(), version),
                None => {
                    tracker.untrack(id)?;
                }
            }
        }
        Ok(())
    }
}

fn empty_path() -> PageTreeError {
    PageTreeError::invariant("path stack is unexpectedly empty")
}

fn check_lifespan(lifespan: &Lifespan, node: PageId) -> PageTreeResult<()> {
    match lifespan.end {
        Some(end) if end <= lifespan.begin => Err(PageTreeError::invariant(&format!(
            "node {} holds an entry with empty lifespan [{}, {})",
            node, lifespan.begin, end
        ))),
        _ => Ok(()),
    }
}

/// The live children must tile `region` without gaps or overlaps.
fn check_partition_of<K: BTreeKey>(
    region: &MvRegion<K>,
    children: &mut [&IndexEntry<MvRegion<K>>],
    node: PageId,
) -> PageTreeResult<()> {
    children.sort_by(|a, b| a.descriptor.min_key.cmp(&b.descriptor.min_key));
    let mut expected = Some(region.min_key.clone());
    for child in children.iter() {
        if expected.as_ref() != Some(&child.descriptor.min_key) {
            return Err(PageTreeError::invariant(&format!(
                "live children of node {} leave a gap or overlap before key {:?}",
                node, child.descriptor.min_key
            )));
        }
        expected = child.descriptor.max_key.clone();
    }
    if expected != region.max_key {
        return Err(PageTreeError::invariant(&format!(
            "live children of node {} end at {:?} instead of {:?}",
            node, expected, region.max_key
        )));
    }
    Ok(())
}

fn region_meets<K: Ord>(region: &MvRegion<K>, bounds: &KeyBounds<K>) -> bool {
    bounds.before_end(&region.min_key)
        && region
            .max_key
            .as_ref()
            .map_or(true, |max| bounds.starts_below(max))
}

fn live_count<K, V>(node: &MvNode<K, V>, now: Version) -> usize {
    match node {
        Node::Leaf { entries } => entries.iter().filter(|e| e.lifespan.alive_at(now)).count(),
        Node::Internal { children, .. } => children
            .iter()
            .filter(|c| c.descriptor.lifespan.alive_at(now))
            .count(),
    }
}

/// Node of the same level holding the entries alive at `now`.
fn live_copy<K: Clone, V: Clone>(node: &MvNode<K, V>, now: Version) -> MvNode<K, V> {
    match node {
        Node::Leaf { entries } => Node::leaf(
            entries
                .iter()
                .filter(|e| e.lifespan.alive_at(now))
                .cloned()
                .collect(),
        ),
        Node::Internal { children, level } => Node::internal(
            children
                .iter()
                .filter(|c| c.descriptor.lifespan.alive_at(now))
                .cloned()
                .collect(),
            *level,
        ),
    }
}

fn absorb<K, V>(into: &mut MvNode<K, V>, other: MvNode<K, V>) -> PageTreeResult<()> {
    match (into, other) {
        (Node::Leaf { entries }, Node::Leaf { entries: more }) => entries.extend(more),
        (Node::Internal { children, .. }, Node::Internal { children: more, .. }) => {
            children.extend(more)
        }
        _ => {
            return Err(PageTreeError::invariant(
                "cannot merge nodes of different levels",
            ))
        }
    }
    Ok(())
}

fn sort_by_key<K: Ord, V>(node: &mut MvNode<K, V>) {
    match node {
        Node::Leaf { entries } => entries.sort_by(|a, b| a.key.cmp(&b.key)),
        Node::Internal { children, .. } => {
            children.sort_by(|a, b| a.descriptor.min_key.cmp(&b.descriptor.min_key))
        }
    }
}

fn split_off<K, V>(node: &mut MvNode<K, V>, at: usize) -> MvNode<K, V> {
    match node {
        Node::Leaf { entries } => Node::leaf(entries.split_off(at)),
        Node::Internal { children, level } => Node::internal(children.split_off(at), *level),
    }
}

fn first_key<K, V>(node: &MvNode<K, V>) -> Option<&K> {
    match node {
        Node::Leaf { entries } => entries.first().map(|e| &e.key),
        Node::Internal { children, .. } => children.first().map(|c| &c.descriptor.min_key),
    }
}

/// Live neighbour of the node with interval `region`, right side first.
fn find_sibling<K: Ord + Clone>(
    children: &[IndexEntry<MvRegion<K>>],
    region: &MvRegion<K>,
    node: PageId,
) -> Option<(usize, IndexEntry<MvRegion<K>>)> {
    let live = || {
        children
            .iter()
            .enumerate()
            .filter(|(_, c)| c.id != node && c.descriptor.lifespan.is_alive())
    };
    let right = live().find(|(_, c)| region.max_key.as_ref() == Some(&c.descriptor.min_key));
    right
        .or_else(|| live().find(|(_, c)| c.descriptor.max_key.as_ref() == Some(&region.min_key)))
        .map(|(idx, c)| (idx, c.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{BlockFileConfig, BlockFileContainer, MemoryContainer};
    use crate::tree::Capacity;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use tempfile::tempdir;

    type MemMvbt = Mvbt<u32, u32, MemoryContainer<MvNode<u32, u32>>>;

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn tree() -> MemMvbt {
        let config = MvbtConfig::new(Capacity::new(2, 8).unwrap(), 0);
        Mvbt::new(MemoryContainer::new(), config).unwrap()
    }

    fn keys_at(tree: &MemMvbt, version: Version) -> Vec<u32> {
        tree.range(.., version)
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect()
    }

    #[test]
    fn test_point_in_time_queries() {
        init_logger();
        let tree = tree();
        for key in 0..100 {
            tree.advance_to(1 + key as Version / 10).unwrap();
            tree.insert(key, key * 10).unwrap();
        }
        tree.advance_to(20).unwrap();
        for key in (0..100).step_by(2) {
            assert_eq!(tree.remove(&key).unwrap(), Some(key * 10));
        }
        assert_eq!(tree.remove(&0).unwrap(), None);

        assert_eq!(tree.len_at(0).unwrap(), 0);
        assert_eq!(tree.len_at(1).unwrap(), 10);
        assert_eq!(tree.len_at(5).unwrap(), 50);
        assert_eq!(tree.len_at(19).unwrap(), 100);
        assert_eq!(keys_at(&tree, 20), (1..100).step_by(2).collect::<Vec<_>>());
        assert_eq!(tree.get(&42, 19).unwrap(), Some(420));
        assert_eq!(tree.get(&42, 20).unwrap(), None);
        assert_eq!(tree.get(&43, 1_000).unwrap(), Some(430));

        let report = tree.check().unwrap();
        assert_eq!(report.entries, 50);
        assert!(report.height > 1);
        assert!(tree.root_history().len() > 1);
        assert_eq!(tree.container().fixed_count(), 0);
    }

    #[test]
    fn test_range_at_version() {
        let tree = tree();
        for key in 0..60 {
            tree.insert(key, key).unwrap();
        }
        tree.advance_to(1).unwrap();
        for key in 10..20 {
            tree.remove(&key).unwrap();
        }
        let at_zero: Vec<u32> = tree.range(5..25, 0).unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(at_zero, (5..25).collect::<Vec<_>>());
        let at_one: Vec<u32> = tree.range(5..25, 1).unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(at_one, vec![5, 6, 7, 8, 9, 20, 21, 22, 23, 24]);
        tree.check().unwrap();
    }

    #[test]
    fn test_update_and_history() {
        let tree = tree();
        tree.advance_to(1).unwrap();
        tree.insert(5, 50).unwrap();
        tree.advance_to(3).unwrap();
        assert_eq!(tree.update(5, 51).unwrap(), Some(50));
        assert_eq!(tree.update(6, 60).unwrap(), None);
        tree.advance_to(5).unwrap();
        tree.remove(&5).unwrap();

        let history = tree.history(&5).unwrap();
        assert_eq!(
            history,
            vec![
                (Lifespan::bounded(1, 3).unwrap(), 50),
                (Lifespan::bounded(3, 5).unwrap(), 51),
            ]
        );
        assert!(tree.history(&6).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_operations() {
        let tree = tree();
        tree.advance_to(4).unwrap();
        tree.insert(1, 1).unwrap();
        let err = tree.insert(1, 2).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidOperation);

        let err = tree.advance_to(3).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidOperation);
        assert_eq!(tree.now(), 4);

        let config = MvbtConfig::new(Capacity::new(2, 8).unwrap(), 10u32);
        let bounded: MemMvbt = Mvbt::new(MemoryContainer::new(), config).unwrap();
        let err = bounded.insert(3, 3).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidOperation);

        let config = MvbtConfig::new(Capacity::new(2, 4).unwrap(), 0u32);
        assert!(MemMvbt::new(MemoryContainer::new(), config).is_err());
    }

    #[test]
    fn test_same_version_churn_leaves_no_trace() {
        let tree = tree();
        tree.advance_to(2).unwrap();
        for key in 0..40 {
            tree.insert(key, key).unwrap();
        }
        for key in 0..40 {
            tree.remove(&key).unwrap();
        }
        assert_eq!(tree.len_at(2).unwrap(), 0);
        assert!(tree.history(&7).unwrap().is_empty());
        tree.check().unwrap();
    }

    #[test]
    fn test_matches_model_at_every_version() {
        init_logger();
        let tree = tree();
        let mut rng = StdRng::seed_from_u64(7);
        let mut live: BTreeMap<u32, u32> = BTreeMap::new();
        let mut snapshots = Vec::new();

        for version in 1..=60u64 {
            tree.advance_to(version).unwrap();
            for _ in 0..12 {
                let key = rng.gen_range(0..150);
                if live.contains_key(&key) {
                    assert_eq!(tree.remove(&key).unwrap(), live.remove(&key));
                } else {
                    let value = rng.gen_range(0..1_000);
                    tree.insert(key, value).unwrap();
                    live.insert(key, value);
                }
            }
            snapshots.push((version, live.clone()));
            tree.check().unwrap();
        }

        for (version, snapshot) in snapshots {
            let expected: Vec<(u32, u32)> = snapshot.into_iter().collect();
            assert_eq!(tree.range(.., version).unwrap(), expected, "version {}", version);
        }
        assert_eq!(tree.container().fixed_count(), 0);
    }

    #[test]
    fn test_remove_everything_shrinks_root() {
        let tree = tree();
        for key in 0..200 {
            tree.insert(key, key).unwrap();
        }
        let grown = tree.height();
        assert!(grown >= 3);

        tree.advance_to(1).unwrap();
        for key in 0..200 {
            tree.remove(&key).unwrap();
            tree.check().unwrap();
        }
        assert!(tree.height() < grown);
        assert_eq!(tree.len_at(1).unwrap(), 0);
        assert_eq!(tree.len_at(0).unwrap(), 200);
    }

    #[test]
    fn test_persistence_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mvbt.db");
        let config = MvbtConfig::new(Capacity::new(4, 16).unwrap(), 0u64);
        type FileMvbt = Mvbt<u64, u64, BlockFileContainer<MvNode<u64, u64>>>;
        {
            let container =
                BlockFileContainer::create(&path, BlockFileConfig::default().with_block_size(1024))
                    .unwrap();
            let tree = FileMvbt::new(container, config.clone()).unwrap();
            for key in 0..300u64 {
                tree.advance_to(key / 30).unwrap();
                tree.insert(key, key + 1).unwrap();
            }
            tree.advance_to(10).unwrap();
            tree.remove(&150).unwrap();
            tree.flush().unwrap();
        }

        let tree = FileMvbt::open(BlockFileContainer::open(&path, 8).unwrap(), config).unwrap();
        assert_eq!(tree.now(), 10);
        assert_eq!(tree.get(&150, 9).unwrap(), Some(151));
        assert_eq!(tree.get(&150, 10).unwrap(), None);
        assert_eq!(tree.len_at(4).unwrap(), 150);
        assert_eq!(tree.check().unwrap().entries, 299);
    }
}
