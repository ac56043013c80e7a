//! String encoding cache
//!
//! Field names repeat heavily across documents. The cache keeps the
//! validated C-string encoding (UTF-8 bytes plus the trailing NUL) of short
//! strings so the encoder can replay them without re-scanning for embedded
//! NUL bytes or re-assembling the terminator.
//!
//! A cache is an explicit object handed to each encoder. Share one through
//! an `Arc` to let several encoders warm the same entries, or give each its
//! own.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Bounded memo of encoded C-strings
#[derive(Debug)]
pub struct StringEncoderCache {
    inner: Mutex<CacheInner>,
    hits: AtomicU64,
    misses: AtomicU64,
}

#[derive(Debug)]
struct CacheInner {
    entries: HashMap<String, Arc<[u8]>>,
    max_entries: usize,
    max_length: usize,
}

impl Default for StringEncoderCache {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_ENTRIES, Self::DEFAULT_MAX_LENGTH)
    }
}

impl StringEncoderCache {
    pub const DEFAULT_MAX_ENTRIES: usize = 24;
    pub const DEFAULT_MAX_LENGTH: usize = 25;

    /// Create a cache holding at most `max_entries` strings of at most
    /// `max_length` bytes each
    pub fn new(max_entries: usize, max_length: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::with_capacity(max_entries),
                max_entries,
                max_length,
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Cached encoding of `s`, if present
    pub fn lookup(&self, s: &str) -> Option<Arc<[u8]>> {
        let found = self.inner.lock().entries.get(s).cloned();
        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    /// Offer a freshly encoded string
    ///
    /// Strings over the length bound, strings containing NUL, and anything
    /// arriving once the cache is full are ignored.
    pub fn admit(&self, s: &str) {
        if s.as_bytes().contains(&0) {
            return;
        }
        let mut inner = self.inner.lock();
        if s.len() > inner.max_length
            || inner.entries.len() >= inner.max_entries
            || inner.entries.contains_key(s)
        {
            return;
        }
        let mut bytes = Vec::with_capacity(s.len() + 1);
        bytes.extend_from_slice(s.as_bytes());
        bytes.push(0);
        inner.entries.insert(s.to_string(), Arc::from(bytes));
    }

    pub fn max_entries(&self) -> usize {
        self.inner.lock().max_entries
    }

    pub fn max_length(&self) -> usize {
        self.inner.lock().max_length
    }

    /// Change the entry bound; shrinking below the current size clears the cache
    pub fn set_max_entries(&self, max_entries: usize) {
        let mut inner = self.inner.lock();
        inner.max_entries = max_entries;
        if inner.entries.len() > max_entries {
            debug!(
                max_entries,
                cached = inner.entries.len(),
                "String cache shrunk below its size, clearing"
            );
            inner.entries.clear();
        }
    }

    /// Change the length bound, evicting entries that no longer fit
    pub fn set_max_length(&self, max_length: usize) {
        let mut inner = self.inner.lock();
        inner.max_length = max_length;
        inner.entries.retain(|key, _| key.len() <= max_length);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }
}
