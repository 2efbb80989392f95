//! LRU cache for measured text widths
//!
//! Measuring a run means shaping it through the font database, and the
//! same strings (the price, mostly) get measured on every card.

use std::num::NonZeroUsize;

use lru::LruCache;

/// Cache key for a measured run
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MetricsKey {
    pub text: String,
    /// Font size (stored as thousandths for stable hashing)
    pub size_thousandths: u32,
}

impl MetricsKey {
    #[must_use]
    pub fn new(text: &str, size: f32) -> Self {
        Self {
            text: text.to_owned(),
            size_thousandths: (size * 1000.0) as u32,
        }
    }
}

/// LRU cache of text advance widths in logical units
pub struct TextMetricsCache {
    cache: LruCache<MetricsKey, f32>,
}

impl TextMetricsCache {
    /// Create a new cache with the given capacity
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)),
        }
    }

    /// Cached width for `text` at `size`, computing it with `measure` on a miss
    pub fn width_or_insert_with(
        &mut self,
        text: &str,
        size: f32,
        measure: impl FnOnce() -> f32,
    ) -> f32 {
        let key = MetricsKey::new(text, size);
        if let Some(width) = self.cache.get(&key) {
            return *width;
        }
        let width = measure();
        self.cache.put(key, width);
        width
    }
}
