use crate::code_cache::CodeEntry;
use lru::LruCache;
use std::sync::Arc;

/// LRU of published entries keyed by unit name, bounded by entry count and approximate bytes.
///
/// Not synchronized; [`crate::CodeCache`] wraps it in a mutex.
#[derive(Debug)]
pub(crate) struct MemoryTier {
    max_entries: usize,
    max_bytes: u64,
    total_bytes: u64,
    evictions: u64,
    lru: LruCache<String, Arc<CodeEntry>>,
}

impl MemoryTier {
    pub(crate) fn new(max_entries: usize, max_bytes: u64) -> Self {
        Self {
            max_entries,
            max_bytes,
            total_bytes: 0,
            evictions: 0,
            lru: LruCache::unbounded(),
        }
    }

    pub(crate) fn get(&mut self, name: &str) -> Option<Arc<CodeEntry>> {
        self.lru.get(name).cloned()
    }

    /// Publishes `entry`, replacing any previous entry for the same unit.
    pub(crate) fn insert(&mut self, entry: Arc<CodeEntry>) {
        let bytes = entry.approx_bytes();
        if self.max_entries == 0 || bytes > self.max_bytes {
            // Can never fit; make sure an older version doesn't linger either.
            self.remove(&entry.key.name);
            return;
        }

        if let Some(prev) = self.lru.put(entry.key.name.clone(), entry) {
            self.total_bytes = self.total_bytes.saturating_sub(prev.approx_bytes());
        }
        self.total_bytes = self.total_bytes.saturating_add(bytes);

        while self.lru.len() > self.max_entries || self.total_bytes > self.max_bytes {
            if !self.evict_one() {
                break;
            }
        }
    }

    pub(crate) fn remove(&mut self, name: &str) -> Option<Arc<CodeEntry>> {
        let removed = self.lru.pop(name)?;
        self.total_bytes = self.total_bytes.saturating_sub(removed.approx_bytes());
        Some(removed)
    }

    pub(crate) fn clear(&mut self) {
        self.lru.clear();
        self.total_bytes = 0;
    }

    /// Evicts least-recently-used entries until at most `target_bytes` remain.
    pub(crate) fn shrink_to(&mut self, target_bytes: u64) -> usize {
        let mut evicted = 0;
        while self.total_bytes > target_bytes && self.evict_one() {
            evicted += 1;
        }
        evicted
    }

    pub(crate) fn len(&self) -> usize {
        self.lru.len()
    }

    pub(crate) fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub(crate) fn evictions(&self) -> u64 {
        self.evictions
    }

    fn evict_one(&mut self) -> bool {
        let Some((_, evicted)) = self.lru.pop_lru() else {
            self.total_bytes = 0;
            return false;
        };
        self.total_bytes = self.total_bytes.saturating_sub(evicted.approx_bytes());
        self.evictions += 1;
        true
    }
}
