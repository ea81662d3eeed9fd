use std::marker::PhantomData;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::page_cache::PageCache;
use super::storage::{FileHeader, FreeListManager, Page, Storage};
use super::{Container, ContainerStats, PageId, DEFAULT_BLOCK_SIZE, DEFAULT_CACHE_PAGES};
use crate::errors::{ErrorKind, PageTreeError, PageTreeResult};

/// Settings of a [`BlockFileContainer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockFileConfig {
    /// Page size in bytes; a node must encode into one page
    pub block_size: usize,
    /// Number of decoded pages kept in the LRU cache
    pub cache_pages: usize,
    /// Store and verify a CRC32 per page
    pub checksums: bool,
}

impl Default for BlockFileConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            cache_pages: DEFAULT_CACHE_PAGES,
            checksums: true,
        }
    }
}

impl BlockFileConfig {
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_cache_pages(mut self, cache_pages: usize) -> Self {
        self.cache_pages = cache_pages;
        self
    }

    pub fn with_checksums(mut self, checksums: bool) -> Self {
        self.checksums = checksums;
        self
    }
}

struct Statistics {
    reads: AtomicU64,
    writes: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    disk_reads: AtomicU64,
    disk_writes: AtomicU64,
}

impl Statistics {
    fn new() -> Self {
        Self {
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            disk_reads: AtomicU64::new(0),
            disk_writes: AtomicU64::new(0),
        }
    }
}

struct MetadataState {
    bytes: Option<Vec<u8>>,
    dirty: bool,
}

/// Container storing nodes in fixed-size pages of a single file.
///
/// Nodes are encoded with bincode, wrapped with a checksum and written lazily:
/// updates land in an LRU page cache and reach the file on eviction or
/// [`Container::flush`]. Fixed pages are never evicted. Removed pages are
/// chained into a free list and reused by later inserts. The header, the free
/// list and the metadata blob survive a close/open cycle.
pub struct BlockFileContainer<N>
where
    N: Clone + Serialize + DeserializeOwned + Send,
{
    storage: Storage,
    cache: Mutex<PageCache<N>>,
    header: Mutex<FileHeader>,
    metadata: Mutex<MetadataState>,
    stats: Statistics,
    closed: RwLock<bool>,
    _marker: PhantomData<fn() -> N>,
}

impl<N> BlockFileContainer<N>
where
    N: Clone + Serialize + DeserializeOwned + Send,
{
    /// Creates a new, empty block file at `path` (truncating an existing one).
    pub fn create(path: impl AsRef<Path>, config: BlockFileConfig) -> PageTreeResult<Self> {
        let storage = Storage::create(path.as_ref(), config.block_size, config.checksums)?;
        let mut header = FileHeader::new(config.block_size);
        header.checksum_enabled = config.checksums;
        storage.write_header(&header)?;
        storage.sync()?;
        log::debug!(
            "Created block file {:?} with block size {}",
            path.as_ref(),
            config.block_size
        );

        Ok(Self::assemble(storage, header, None, config.cache_pages))
    }

    /// Opens an existing block file. Only the header and the metadata blob are
    /// read; nodes stay on disk until accessed.
    pub fn open(path: impl AsRef<Path>, cache_pages: usize) -> PageTreeResult<Self> {
        let (storage, header) = Storage::open(path.as_ref())?;
        let metadata = if header.metadata_head != 0 {
            Some(FreeListManager::read_chain(&storage, header.metadata_head)?)
        } else {
            None
        };
        log::debug!(
            "Opened block file {:?} with {} nodes",
            path.as_ref(),
            header.node_count
        );

        Ok(Self::assemble(storage, header, metadata, cache_pages))
    }

    fn assemble(
        storage: Storage,
        header: FileHeader,
        metadata: Option<Vec<u8>>,
        cache_pages: usize,
    ) -> Self {
        Self {
            storage,
            cache: Mutex::new(PageCache::new(cache_pages)),
            header: Mutex::new(header),
            metadata: Mutex::new(MetadataState {
                bytes: metadata,
                dirty: false,
            }),
            stats: Statistics::new(),
            closed: RwLock::new(false),
            _marker: PhantomData,
        }
    }

    pub fn block_size(&self) -> usize {
        self.storage.page_size()
    }

    /// Largest encoded node that fits in one block.
    pub fn max_node_bytes(&self) -> usize {
        self.storage.max_payload()
    }

    /// Number of pages currently on the free list.
    pub fn free_pages(&self) -> u64 {
        self.header.lock().free_page_count
    }

    /// Flushes and marks the container closed. Further calls fail with
    /// [`ErrorKind::StoreClosed`].
    pub fn close(&self) -> PageTreeResult<()> {
        if *self.closed.read() {
            return Ok(());
        }
        self.flush()?;
        *self.closed.write() = true;
        Ok(())
    }

    fn check_closed(&self) -> PageTreeResult<()> {
        if *self.closed.read() {
            return Err(PageTreeError::new(
                "Block file container is closed",
                ErrorKind::StoreClosed,
            ));
        }
        Ok(())
    }

    fn write_node_page(&self, page_id: PageId, node: &N) -> PageTreeResult<()> {
        let bytes = bincode::serde::encode_to_vec(node, bincode::config::legacy())?;
        if bytes.len() > self.storage.max_payload() {
            return Err(PageTreeError::new(
                &format!(
                    "Node {} too large: {} bytes (max {})",
                    page_id,
                    bytes.len(),
                    self.storage.max_payload()
                ),
                ErrorKind::InvalidOperation,
            ));
        }
        self.storage.write_page(page_id, Page::Node(bytes))?;
        self.stats.disk_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Adds a node to the cache, evicting unfixed pages first.
    /// Evicted dirty pages are written to disk.
    fn cache_node(
        &self,
        cache: &mut PageCache<N>,
        page_id: PageId,
        node: N,
        dirty: bool,
    ) -> PageTreeResult<()> {
        if !cache.contains(page_id) {
            while cache.needs_eviction() {
                match cache.evict_oldest() {
                    Some((evict_id, evict_node, evict_dirty)) => {
                        if evict_dirty {
                            self.write_node_page(evict_id, &evict_node)?;
                        }
                    }
                    None => {
                        log::trace!("page cache overfull: every cached page is fixed");
                        break;
                    }
                }
            }
        }
        cache.insert(page_id, node, dirty);
        Ok(())
    }

    /// Reads a node - first checks the cache, then loads it from disk.
    fn load(&self, cache: &mut PageCache<N>, page_id: PageId) -> PageTreeResult<N> {
        if let Some(node) = cache.get(page_id) {
            self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(node.clone());
        }

        self.stats.cache_misses.fetch_add(1, Ordering::Relaxed);
        if page_id == 0 || page_id >= self.header.lock().next_page_id {
            return Err(unknown_page(page_id));
        }
        self.stats.disk_reads.fetch_add(1, Ordering::Relaxed);
        let node: N = match self.storage.read_page(page_id)? {
            Page::Node(bytes) => {
                let (node, _) =
                    bincode::serde::decode_from_slice(&bytes, bincode::config::legacy())?;
                node
            }
            Page::Reserved => {
                return Err(PageTreeError::new(
                    &format!("Node {} is reserved but was never written", page_id),
                    ErrorKind::NotFound,
                ))
            }
            _ => return Err(unknown_page(page_id)),
        };
        self.cache_node(cache, page_id, node.clone(), false)?;
        Ok(node)
    }
}

fn unknown_page(page_id: PageId) -> PageTreeError {
    PageTreeError::new(
        &format!("Node {} does not exist", page_id),
        ErrorKind::NotFound,
    )
}

impl<N> Container<N> for BlockFileContainer<N>
where
    N: Clone + Serialize + DeserializeOwned + Send,
{
    fn insert(&self, node: &N) -> PageTreeResult<PageId> {
        self.check_closed()?;
        let page_id = {
            let mut header = self.header.lock();
            let page_id = FreeListManager::allocate_page(&self.storage, &mut header)?;
            header.node_count += 1;
            page_id
        };
        let mut cache = self.cache.lock();
        self.cache_node(&mut cache, page_id, node.clone(), true)?;
        self.stats.writes.fetch_add(1, Ordering::Relaxed);
        Ok(page_id)
    }

    fn reserve(&self) -> PageTreeResult<PageId> {
        self.check_closed()?;
        let mut header = self.header.lock();
        let page_id = FreeListManager::allocate_page(&self.storage, &mut header)?;
        self.storage.write_page(page_id, Page::Reserved)?;
        self.stats.disk_writes.fetch_add(1, Ordering::Relaxed);
        header.node_count += 1;
        Ok(page_id)
    }

    fn get(&self, id: PageId, unfix: bool) -> PageTreeResult<N> {
        self.check_closed()?;
        let mut cache = self.cache.lock();
        let node = self.load(&mut cache, id)?;
        if !unfix {
            cache.fix(id);
        }
        self.stats.reads.fetch_add(1, Ordering::Relaxed);
        Ok(node)
    }

    fn update(&self, id: PageId, node: &N, unfix: bool) -> PageTreeResult<()> {
        self.check_closed()?;
        if !self.contains(id) {
            return Err(unknown_page(id));
        }
        let mut cache = self.cache.lock();
        self.cache_node(&mut cache, id, node.clone(), true)?;
        if unfix {
            cache.unfix(id);
        }
        self.stats.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn remove(&self, id: PageId) -> PageTreeResult<()> {
        self.check_closed()?;
        if !self.contains(id) {
            return Err(unknown_page(id));
        }
        self.cache.lock().remove(id);
        let mut header = self.header.lock();
        FreeListManager::free_page(&self.storage, &mut header, id)?;
        header.node_count = header.node_count.saturating_sub(1);
        Ok(())
    }

    fn unfix(&self, id: PageId) -> PageTreeResult<()> {
        self.cache.lock().unfix(id);
        Ok(())
    }

    fn contains(&self, id: PageId) -> bool {
        if self.cache.lock().contains(id) {
            return true;
        }
        if id == 0 || id >= self.header.lock().next_page_id {
            return false;
        }
        matches!(
            self.storage.read_page(id),
            Ok(Page::Node(_)) | Ok(Page::Reserved)
        )
    }

    fn len(&self) -> usize {
        self.header.lock().node_count as usize
    }

    fn fixed_count(&self) -> usize {
        self.cache.lock().fixed_count()
    }

    fn metadata(&self) -> PageTreeResult<Option<Vec<u8>>> {
        self.check_closed()?;
        Ok(self.metadata.lock().bytes.clone())
    }

    fn set_metadata(&self, bytes: &[u8]) -> PageTreeResult<()> {
        self.check_closed()?;
        let mut metadata = self.metadata.lock();
        metadata.bytes = Some(bytes.to_vec());
        metadata.dirty = true;
        Ok(())
    }

    /// Flushes all dirty pages, the metadata chain and the header to disk.
    fn flush(&self) -> PageTreeResult<()> {
        self.check_closed()?;
        {
            let mut cache = self.cache.lock();
            for page_id in cache.dirty_pages() {
                if let Some(node) = cache.peek(page_id) {
                    self.write_node_page(page_id, node)?;
                }
                cache.mark_clean(page_id);
            }
        }

        let mut header = self.header.lock();
        {
            let mut metadata = self.metadata.lock();
            if metadata.dirty {
                if header.metadata_head != 0 {
                    let old_head = header.metadata_head;
                    FreeListManager::free_chain(&self.storage, &mut header, old_head)?;
                }
                header.metadata_head = match &metadata.bytes {
                    Some(bytes) => FreeListManager::write_chain(&self.storage, &mut header, bytes)?,
                    None => 0,
                };
                metadata.dirty = false;
            }
        }
        self.storage.write_header(&header)?;
        self.storage.sync()?;
        Ok(())
    }

    fn stats(&self) -> ContainerStats {
        let cache = self.cache.lock();
        ContainerStats {
            nodes: self.header.lock().node_count,
            reads: self.stats.reads.load(Ordering::Relaxed),
            writes: self.stats.writes.load(Ordering::Relaxed),
            cache_hits: self.stats.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.stats.cache_misses.load(Ordering::Relaxed),
            disk_reads: self.stats.disk_reads.load(Ordering::Relaxed),
            disk_writes: self.stats.disk_writes.load(Ordering::Relaxed),
            fixed: cache.fixed_count() as u64,
        }
    }
}

impl<N> Drop for BlockFileContainer<N>
where
    N: Clone + Serialize + DeserializeOwned + Send,
{
    fn drop(&mut self) {
        // Best effort flush on drop
        if !*self.closed.read() {
            if let Err(err) = self.flush() {
                log::warn!("Failed to flush block file {:?} on drop: {}", self.storage.path(), err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    type TestNode = Vec<u32>;

    fn small_config() -> BlockFileConfig {
        BlockFileConfig::default()
            .with_block_size(256)
            .with_cache_pages(4)
    }

    #[test]
    fn test_insert_get_update() {
        let dir = tempdir().unwrap();
        let container: BlockFileContainer<TestNode> =
            BlockFileContainer::create(dir.path().join("c.tree"), small_config()).unwrap();

        let id = container.insert(&vec![1, 2, 3]).unwrap();
        assert_eq!(container.get(id, true).unwrap(), vec![1, 2, 3]);

        container.update(id, &vec![4], false).unwrap();
        assert_eq!(container.get(id, true).unwrap(), vec![4]);
        assert_eq!(container.len(), 1);
    }

    #[test]
    fn test_eviction_writes_dirty_pages() {
        let dir = tempdir().unwrap();
        let container: BlockFileContainer<TestNode> =
            BlockFileContainer::create(dir.path().join("c.tree"), small_config()).unwrap();

        let ids: Vec<_> = (0..20u32)
            .map(|i| container.insert(&vec![i; 3]).unwrap())
            .collect();
        assert!(container.stats().disk_writes > 0, "evicted pages should be written");

        for (i, id) in ids.iter().enumerate() {
            assert_eq!(container.get(*id, true).unwrap(), vec![i as u32; 3]);
        }
        assert!(container.stats().disk_reads > 0);
    }

    #[test]
    fn test_fixed_pages_survive_cache_pressure() {
        let dir = tempdir().unwrap();
        let container: BlockFileContainer<TestNode> =
            BlockFileContainer::create(dir.path().join("c.tree"), small_config()).unwrap();

        let pinned = container.insert(&vec![42]).unwrap();
        container.get(pinned, false).unwrap();
        for i in 0..10u32 {
            container.insert(&vec![i]).unwrap();
        }
        assert_eq!(container.fixed_count(), 1);
        container.update(pinned, &vec![43], true).unwrap();
        assert_eq!(container.fixed_count(), 0);
        assert_eq!(container.get(pinned, true).unwrap(), vec![43]);
    }

    #[test]
    fn test_remove_reuses_page() {
        let dir = tempdir().unwrap();
        let container: BlockFileContainer<TestNode> =
            BlockFileContainer::create(dir.path().join("c.tree"), small_config()).unwrap();

        let a = container.insert(&vec![1]).unwrap();
        let _b = container.insert(&vec![2]).unwrap();
        container.remove(a).unwrap();
        assert!(!container.contains(a));
        assert_eq!(container.free_pages(), 1);
        assert_eq!(container.get(a, true).unwrap_err().kind(), &ErrorKind::NotFound);

        let c = container.insert(&vec![3]).unwrap();
        assert_eq!(c, a);
        assert_eq!(container.len(), 2);
    }

    #[test]
    fn test_reserved_page() {
        let dir = tempdir().unwrap();
        let container: BlockFileContainer<TestNode> =
            BlockFileContainer::create(dir.path().join("c.tree"), small_config()).unwrap();

        let id = container.reserve().unwrap();
        assert!(container.contains(id));
        assert_eq!(container.get(id, true).unwrap_err().kind(), &ErrorKind::NotFound);
        container.update(id, &vec![5], false).unwrap();
        assert_eq!(container.get(id, true).unwrap(), vec![5]);
    }

    #[test]
    fn test_node_too_large_is_rejected_on_write() {
        let dir = tempdir().unwrap();
        let container: BlockFileContainer<TestNode> =
            BlockFileContainer::create(dir.path().join("c.tree"), small_config()).unwrap();

        container.insert(&vec![0; 500]).unwrap();
        let err = container.flush().unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidOperation);
    }

    #[test]
    fn test_persistence_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("c.tree");
        let ids: Vec<PageId>;
        {
            let container: BlockFileContainer<TestNode> =
                BlockFileContainer::create(&path, small_config()).unwrap();
            ids = (0..8u32).map(|i| container.insert(&vec![i]).unwrap()).collect();
            container.remove(ids[3]).unwrap();
            container.set_metadata(&vec![9u8; 600]).unwrap();
            container.close().unwrap();
            assert_eq!(container.len(), 7);
            assert_eq!(container.insert(&vec![1]).unwrap_err().kind(), &ErrorKind::StoreClosed);
        }

        let container: BlockFileContainer<TestNode> = BlockFileContainer::open(&path, 4).unwrap();
        assert_eq!(container.len(), 7);
        assert_eq!(container.metadata().unwrap(), Some(vec![9u8; 600]));
        assert_eq!(container.get(ids[7], true).unwrap(), vec![7]);
        assert!(!container.contains(ids[3]));
        let fresh = container.insert(&vec![100]).unwrap();
        assert!(!ids.contains(&fresh) || fresh == ids[3]);
        assert_eq!(container.get(fresh, true).unwrap(), vec![100]);
    }

    #[test]
    fn test_metadata_rewrite_frees_old_chain() {
        let dir = tempdir().unwrap();
        let container: BlockFileContainer<TestNode> =
            BlockFileContainer::create(dir.path().join("c.tree"), small_config()).unwrap();

        container.set_metadata(&vec![1u8; 1000]).unwrap();
        container.flush().unwrap();
        container.set_metadata(&[2u8]).unwrap();
        container.flush().unwrap();
        assert!(container.free_pages() > 0);
        assert_eq!(container.metadata().unwrap(), Some(vec![2u8]));
    }
}
