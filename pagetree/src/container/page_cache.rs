//! LRU cache for container pages.
//!
//! Pages are loaded lazily: the cache only holds pages that were read or
//! written through it. A page with a non-zero fix count is never chosen for
//! eviction.

use std::collections::{HashMap, VecDeque};

use super::PageId;

/// A cached page with its dirty flag and fix count
pub struct CachedPage<N> {
    pub node: N,
    pub dirty: bool,
    pub fixes: u32,
}

/// LRU cache of decoded pages.
pub struct PageCache<N> {
    pages: HashMap<PageId, CachedPage<N>>,
    /// LRU order (front = oldest, back = newest)
    lru_order: VecDeque<PageId>,
    max_pages: usize,
}

impl<N> PageCache<N> {
    pub fn new(max_pages: usize) -> Self {
        Self {
            pages: HashMap::new(),
            lru_order: VecDeque::new(),
            max_pages: max_pages.max(1),
        }
    }

    fn touch(&mut self, page_id: PageId) {
        self.lru_order.retain(|&id| id != page_id);
        self.lru_order.push_back(page_id);
    }

    /// Get a page, updating LRU order.
    /// Returns None if the page is not cached (must be loaded from disk).
    pub fn get(&mut self, page_id: PageId) -> Option<&N> {
        if self.pages.contains_key(&page_id) {
            self.touch(page_id);
            self.pages.get(&page_id).map(|cached| &cached.node)
        } else {
            None
        }
    }

    /// Insert or replace a page. An existing fix count is kept.
    pub fn insert(&mut self, page_id: PageId, node: N, dirty: bool) {
        self.touch(page_id);
        match self.pages.get_mut(&page_id) {
            Some(cached) => {
                cached.node = node;
                cached.dirty |= dirty;
            }
            None => {
                self.pages.insert(page_id, CachedPage { node, dirty, fixes: 0 });
            }
        }
    }

    /// Adds one fix on a cached page. Returns false if the page is not cached.
    pub fn fix(&mut self, page_id: PageId) -> bool {
        match self.pages.get_mut(&page_id) {
            Some(cached) => {
                cached.fixes += 1;
                true
            }
            None => false,
        }
    }

    /// Releases one fix on a cached page.
    pub fn unfix(&mut self, page_id: PageId) {
        if let Some(cached) = self.pages.get_mut(&page_id) {
            cached.fixes = cached.fixes.saturating_sub(1);
        }
    }

    pub fn fixes(&self, page_id: PageId) -> u32 {
        self.pages.get(&page_id).map(|c| c.fixes).unwrap_or(0)
    }

    pub fn fixed_count(&self) -> usize {
        self.pages.values().filter(|c| c.fixes > 0).count()
    }

    /// Check if we need to evict pages
    pub fn needs_eviction(&self) -> bool {
        self.pages.len() >= self.max_pages
    }

    /// Evicts the least recently used page that is not fixed.
    /// Returns (page_id, node, dirty), or None when every cached page is fixed.
    pub fn evict_oldest(&mut self) -> Option<(PageId, N, bool)> {
        let position = self
            .lru_order
            .iter()
            .position(|id| self.pages.get(id).map(|c| c.fixes == 0).unwrap_or(true))?;
        let page_id = self.lru_order.remove(position)?;
        let cached = self.pages.remove(&page_id)?;
        Some((page_id, cached.node, cached.dirty))
    }

    /// All dirty pages, for flushing
    pub fn dirty_pages(&self) -> Vec<PageId> {
        let mut dirty: Vec<_> = self
            .pages
            .iter()
            .filter(|(_, cached)| cached.dirty)
            .map(|(id, _)| *id)
            .collect();
        dirty.sort_unstable();
        dirty
    }

    pub fn peek(&self, page_id: PageId) -> Option<&N> {
        self.pages.get(&page_id).map(|c| &c.node)
    }

    pub fn mark_clean(&mut self, page_id: PageId) {
        if let Some(cached) = self.pages.get_mut(&page_id) {
            cached.dirty = false;
        }
    }

    /// Remove a page from cache regardless of its fix count
    pub fn remove(&mut self, page_id: PageId) -> Option<(N, bool)> {
        self.lru_order.retain(|&id| id != page_id);
        self.pages.remove(&page_id).map(|c| (c.node, c.dirty))
    }

    /// Clear the cache, returning every page with its dirty flag
    pub fn clear(&mut self) -> Vec<(PageId, N, bool)> {
        let result: Vec<_> = self
            .pages
            .drain()
            .map(|(id, cached)| (id, cached.node, cached.dirty))
            .collect();
        self.lru_order.clear();
        result
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn contains(&self, page_id: PageId) -> bool {
        self.pages.contains_key(&page_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_cache_new() {
        let cache: PageCache<u32> = PageCache::new(10);
        assert_eq!(cache.len(), 0);
        assert!(cache.is_empty());
        assert!(!cache.needs_eviction());
    }

    #[test]
    fn test_page_cache_insert_and_get() {
        let mut cache = PageCache::new(10);
        cache.insert(1, "a", false);
        assert!(cache.contains(1));
        assert_eq!(cache.get(1), Some(&"a"));
        assert_eq!(cache.get(999), None);
    }

    #[test]
    fn test_page_cache_lru_order_get() {
        let mut cache = PageCache::new(10);
        cache.insert(1, 1, false);
        cache.insert(2, 2, false);
        cache.insert(3, 3, false);

        let _ = cache.get(1);

        assert_eq!(cache.evict_oldest().unwrap().0, 2);
        assert_eq!(cache.evict_oldest().unwrap().0, 3);
        assert_eq!(cache.evict_oldest().unwrap().0, 1);
        assert!(cache.evict_oldest().is_none());
    }

    #[test]
    fn test_page_cache_fixed_pages_are_not_evicted() {
        let mut cache = PageCache::new(2);
        cache.insert(1, 1, false);
        cache.insert(2, 2, true);
        assert!(cache.needs_eviction());

        assert!(cache.fix(1));
        let (id, node, dirty) = cache.evict_oldest().unwrap();
        assert_eq!((id, node, dirty), (2, 2, true));

        // only the fixed page is left
        assert!(cache.evict_oldest().is_none());
        cache.unfix(1);
        assert_eq!(cache.evict_oldest().unwrap().0, 1);
    }

    #[test]
    fn test_page_cache_insert_keeps_fix_count() {
        let mut cache = PageCache::new(4);
        cache.insert(7, 1, false);
        cache.fix(7);
        cache.insert(7, 2, true);
        assert_eq!(cache.fixes(7), 1);
        assert_eq!(cache.peek(7), Some(&2));
        assert_eq!(cache.fixed_count(), 1);
        assert!(!cache.fix(8));
    }

    #[test]
    fn test_page_cache_dirty_pages_and_mark_clean() {
        let mut cache = PageCache::new(10);
        cache.insert(3, 0, true);
        cache.insert(1, 0, true);
        cache.insert(2, 0, false);

        assert_eq!(cache.dirty_pages(), vec![1, 3]);
        cache.mark_clean(1);
        assert_eq!(cache.dirty_pages(), vec![3]);
    }

    #[test]
    fn test_page_cache_remove_and_clear() {
        let mut cache = PageCache::new(10);
        cache.insert(1, 10, true);
        cache.insert(2, 20, false);
        cache.fix(1);

        assert_eq!(cache.remove(1), Some((10, true)));
        assert_eq!(cache.fixed_count(), 0);

        let cleared = cache.clear();
        assert_eq!(cleared.len(), 1);
        assert!(cache.is_empty());
    }
}
