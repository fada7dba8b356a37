//! Bounded memo of rendered markup.

use std::num::NonZeroUsize;

use lru::LruCache;

use crate::backend::BackendKind;
use crate::fragment::NormalizedFragment;

/// Identity of a rendered result.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub text: String,
    pub display_mode: bool,
    pub backend: BackendKind,
}

impl CacheKey {
    pub fn new(content: &NormalizedFragment, backend: BackendKind) -> Self {
        Self {
            text: content.key_text.clone(),
            display_mode: content.display_mode,
            backend,
        }
    }
}

/// LRU cache of rendered markup with hit accounting.
///
/// `epoch` advances on every [`RenderCache::clear`]; results computed under an
/// older epoch are discarded by [`RenderCache::put_if_fresh`].
pub struct RenderCache {
    entries: LruCache<CacheKey, String>,
    hits: u64,
    misses: u64,
    epoch: u64,
}

impl RenderCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            hits: 0,
            misses: 0,
            epoch: 0,
        }
    }

    pub fn get(&mut self, key: &CacheKey) -> Option<String> {
        match self.entries.get(key) {
            Some(markup) => {
                self.hits += 1;
                Some(markup.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Look up without touching recency or the hit counters.
    pub fn peek(&self, key: &CacheKey) -> Option<&str> {
        self.entries.peek(key).map(String::as_str)
    }

    pub fn put(&mut self, key: CacheKey, markup: String) {
        self.entries.put(key, markup);
    }

    /// Insert only if no `clear` happened since `epoch` was read.
    pub fn put_if_fresh(&mut self, key: CacheKey, markup: String, epoch: u64) -> bool {
        if epoch != self.epoch {
            return false;
        }
        self.put(key, markup);
        true
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.hits = 0;
        self.misses = 0;
        self.epoch += 1;
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    /// Fraction of lookups served from the cache, `0.0` before any lookup.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
