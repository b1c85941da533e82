//! Bounded recency cache of announcement ids already seen.
//!
//! The poller asks [`DedupCache::contains`] once per candidate per cycle. The
//! check doubles as an insert: whatever answer it returns, the id is "seen"
//! afterwards and sits at the most-recently-used end. Ids that stay visible in
//! the feed window keep getting touched, so eviction always lands on ids that
//! dropped out of the feed first.

use lru::LruCache;
use std::num::NonZeroUsize;

/// Fixed-capacity, least-recently-used set of item ids.
pub struct DedupCache {
    inner: LruCache<String, ()>,
}

impl DedupCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            inner: LruCache::new(capacity),
        }
    }

    /// Check-and-insert.
    ///
    /// Returns `true` if `id` was already present (and promotes it to
    /// most-recently-used). Returns `false` if it was absent, after inserting
    /// it, evicting the least-recently-used id when the cache is full.
    pub fn contains(&mut self, id: &str) -> bool {
        if self.inner.get(id).is_some() {
            return true;
        }
        self.inner.put(id.to_owned(), ());
        false
    }

    /// Insert `id`, or refresh its recency if it is already present.
    pub fn insert(&mut self, id: &str) {
        if self.inner.get(id).is_none() {
            self.inner.put(id.to_owned(), ());
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn capacity(&self) -> NonZeroUsize {
        self.inner.cap()
    }

    /// Ids from least- to most-recently-used. Eviction order, for tests only.
    #[cfg(test)]
    fn lru_order(&self) -> Vec<String> {
        self.inner.iter().rev().map(|(k, _)| k.clone()).collect()
    }
}

impl std::fmt::Debug for DedupCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupCache")
            .field("len", &self.inner.len())
            .field("capacity", &self.inner.cap())
            .finish()
    }
}
