//! Block-store collaborators that hold tree nodes.
//!
//! The tree core never keeps raw pointers to nodes. An index entry stores the
//! id of its child and every access goes through a [`Container`]. Containers
//! buffer nodes and expose fix/unfix (pin) semantics: a node fetched with
//! `unfix == false` stays pinned until it is written back with
//! `update(.., unfix = true)` or released with [`Container::unfix`].
//!
//! Two implementations ship with the crate:
//! - [`MemoryContainer`]: an id-keyed map, useful for tests and transient trees
//! - [`BlockFileContainer`]: fixed-size pages in a file with an LRU page cache,
//!   checksummed pages and a persistent free-page chain

mod block_file;
mod memory;
mod page_cache;
mod storage;

pub use block_file::{BlockFileConfig, BlockFileContainer};
pub use memory::MemoryContainer;
pub use page_cache::PageCache;
pub use storage::{FileHeader, Storage, DEFAULT_BLOCK_SIZE, DEFAULT_CACHE_PAGES, PAGE_OVERHEAD};

use crate::errors::PageTreeResult;

/// Page/node id inside a container. `0` is never handed out.
pub type PageId = u64;

/// Counters describing container activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerStats {
    /// Nodes currently stored (reserved slots included)
    pub nodes: u64,
    /// Node reads served to the tree
    pub reads: u64,
    /// Node writes accepted from the tree
    pub writes: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Pages read from / written to the backing medium
    pub disk_reads: u64,
    pub disk_writes: u64,
    /// Ids currently fixed (pinned) at least once
    pub fixed: u64,
}

/// Id-keyed node store with buffering semantics.
///
/// All methods take `&self`; implementations synchronise internally so a tree
/// and the cursors borrowed from it can share one container.
pub trait Container<N>: Send + Sync {
    /// Stores a new node and returns its id. The node is not fixed.
    fn insert(&self, node: &N) -> PageTreeResult<PageId>;

    /// Reserves an id for a node whose content is written later with
    /// [`Container::update`].
    fn reserve(&self) -> PageTreeResult<PageId>;

    /// Loads a node. With `unfix == false` the node stays fixed until it is
    /// released.
    fn get(&self, id: PageId, unfix: bool) -> PageTreeResult<N>;

    /// Replaces the node stored under `id`; with `unfix == true` one fix on
    /// `id` is released.
    fn update(&self, id: PageId, node: &N, unfix: bool) -> PageTreeResult<()>;

    /// Removes a node. Pending fixes on the id are dropped with it.
    fn remove(&self, id: PageId) -> PageTreeResult<()>;

    /// Releases one fix on `id`.
    fn unfix(&self, id: PageId) -> PageTreeResult<()>;

    fn contains(&self, id: PageId) -> bool;

    /// Number of stored nodes (reserved slots included).
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of ids currently fixed at least once.
    fn fixed_count(&self) -> usize;

    /// Opaque metadata blob stored alongside the nodes (tree root, height, ...).
    fn metadata(&self) -> PageTreeResult<Option<Vec<u8>>>;

    fn set_metadata(&self, bytes: &[u8]) -> PageTreeResult<()>;

    /// Makes all buffered writes durable.
    fn flush(&self) -> PageTreeResult<()>;

    fn stats(&self) -> ContainerStats;
}
