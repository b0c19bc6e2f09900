use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;

use crate::template::AvailableParameter;

/// Thread-safe LRU cache of available-parameter trees, keyed by entity kind.
///
/// Schemas are static for the lifetime of the process, so a computed tree
/// never goes stale; the bound only limits memory.
pub struct ParametersCache {
    cache: Mutex<LruCache<String, AvailableParameter>>,
}

impl ParametersCache {
    /// Create a cache holding at most `capacity` kinds.
    ///
    /// # Panics
    ///
    /// Never in practice: a zero capacity is raised to 1.
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).expect("Cache capacity must be at least 1");

        Self {
            cache: Mutex::new(LruCache::new(cap)),
        }
    }

    pub fn get(&self, kind: &str) -> Option<AvailableParameter> {
        self.cache.lock().unwrap().get(kind).cloned()
    }

    pub fn put(&self, kind: String, parameters: AvailableParameter) {
        self.cache.lock().unwrap().put(kind, parameters);
    }

    /// Cached tree for `kind`, computing and storing it on a miss. `None`
    /// when `compute` finds no schema for the kind; misses are not cached.
    pub fn get_or_compute<F>(&self, kind: &str, compute: F) -> Option<AvailableParameter>
    where
        F: FnOnce() -> Option<AvailableParameter>,
    {
        if let Some(hit) = self.get(kind) {
            log::debug!("Parameters cache hit for {}", kind);
            return Some(hit);
        }
        let computed = compute()?;
        self.put(kind.to_string(), computed.clone());
        Some(computed)
    }

    pub fn len(&self) -> usize {
        self.cache.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.lock().unwrap().is_empty()
    }

    pub fn clear(&self) {
        self.cache.lock().unwrap().clear();
    }
}
