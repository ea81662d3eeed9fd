use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use super::{Container, ContainerStats, PageId};
use crate::errors::{ErrorKind, PageTreeError, PageTreeResult};

struct Slot<N> {
    node: Option<N>,
    fixes: u32,
}

struct MemoryInner<N> {
    slots: HashMap<PageId, Slot<N>>,
    next_id: PageId,
    metadata: Option<Vec<u8>>,
}

/// Container keeping every node in an in-process map.
///
/// Nodes are cloned in and out, so a tree never observes a node that was
/// mutated behind its back. Fix counts are tracked exactly like a buffered
/// container would, which lets tests assert that every traversal released
/// what it fixed.
pub struct MemoryContainer<N> {
    inner: Mutex<MemoryInner<N>>,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl<N> MemoryContainer<N> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemoryInner {
                slots: HashMap::new(),
                next_id: 1,
                metadata: None,
            }),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// Ids of all stored nodes, ascending.
    pub fn ids(&self) -> Vec<PageId> {
        let inner = self.inner.lock();
        let mut ids: Vec<_> = inner.slots.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl<N> Default for MemoryContainer<N> {
    fn default() -> Self {
        Self::new()
    }
}

fn unknown_id(id: PageId) -> PageTreeError {
    PageTreeError::new(&format!("Node {} does not exist", id), ErrorKind::NotFound)
}

impl<N: Clone + Send> Container<N> for MemoryContainer<N> {
    fn insert(&self, node: &N) -> PageTreeResult<PageId> {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.slots.insert(
            id,
            Slot {
                node: Some(node.clone()),
                fixes: 0,
            },
        );
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(id)
    }

    fn reserve(&self) -> PageTreeResult<PageId> {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.slots.insert(id, Slot { node: None, fixes: 0 });
        Ok(id)
    }

    fn get(&self, id: PageId, unfix: bool) -> PageTreeResult<N> {
        let mut inner = self.inner.lock();
        let slot = inner.slots.get_mut(&id).ok_or_else(|| unknown_id(id))?;
        let node = slot.node.clone().ok_or_else(|| {
            PageTreeError::new(
                &format!("Node {} is reserved but was never written", id),
                ErrorKind::NotFound,
            )
        })?;
        if !unfix {
            slot.fixes += 1;
        }
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(node)
    }

    fn update(&self, id: PageId, node: &N, unfix: bool) -> PageTreeResult<()> {
        let mut inner = self.inner.lock();
        let slot = inner.slots.get_mut(&id).ok_or_else(|| unknown_id(id))?;
        slot.node = Some(node.clone());
        if unfix {
            slot.fixes = slot.fixes.saturating_sub(1);
        }
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn remove(&self, id: PageId) -> PageTreeResult<()> {
        let mut inner = self.inner.lock();
        inner.slots.remove(&id).ok_or_else(|| unknown_id(id))?;
        Ok(())
    }

    fn unfix(&self, id: PageId) -> PageTreeResult<()> {
        let mut inner = self.inner.lock();
        if let Some(slot) = inner.slots.get_mut(&id) {
            if slot.fixes == 0 {
                log::trace!("unfix on node {} which is not fixed", id);
            }
            slot.fixes = slot.fixes.saturating_sub(1);
        }
        Ok(())
    }

    fn contains(&self, id: PageId) -> bool {
        self.inner.lock().slots.contains_key(&id)
    }

    fn len(&self) -> usize {
        self.inner.lock().slots.len()
    }

    fn fixed_count(&self) -> usize {
        self.inner
            .lock()
            .slots
            .values()
            .filter(|slot| slot.fixes > 0)
            .count()
    }

    fn metadata(&self) -> PageTreeResult<Option<Vec<u8>>> {
        Ok(self.inner.lock().metadata.clone())
    }

    fn set_metadata(&self, bytes: &[u8]) -> PageTreeResult<()> {
        self.inner.lock().metadata = Some(bytes.to_vec());
        Ok(())
    }

    fn flush(&self) -> PageTreeResult<()> {
        Ok(())
    }

    fn stats(&self) -> ContainerStats {
        ContainerStats {
            nodes: self.len() as u64,
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            fixed: self.fixed_count() as u64,
            ..ContainerStats::default()
        }
    }
}
