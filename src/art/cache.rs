use super::{ArtEntry, ArtError, CacheKey};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

/// Byte-bounded LRU cache of decoded album art.
///
/// Every read and write goes through one mutex, so `get`, `put`, `invalidate`
/// and `clear` are serialized against each other and against decode workers
/// inserting results.
#[derive(Debug)]
pub struct ArtCache {
    capacity: usize,
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<CacheKey, Slot>,
    // tick -> key, lowest tick = least recently used
    recency: BTreeMap<u64, CacheKey>,
    next_tick: u64,
    occupied: usize,
    hits: u64,
    misses: u64,
    insertions: u64,
    evictions: u64,
}

#[derive(Debug)]
struct Slot {
    entry: Arc<ArtEntry>,
    tick: u64,
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub occupied_bytes: usize,
    pub capacity_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub insertions: u64,
    pub evictions: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

impl Inner {
    fn touch(&mut self, key: &CacheKey) -> Option<Arc<ArtEntry>> {
        let tick = self.next_tick;
        let slot = self.entries.get_mut(key)?;
        self.recency.remove(&slot.tick);
        slot.tick = tick;
        self.recency.insert(tick, key.clone());
        self.next_tick += 1;
        Some(Arc::clone(&slot.entry))
    }

    fn remove(&mut self, key: &CacheKey) -> Option<Arc<ArtEntry>> {
        let slot = self.entries.remove(key)?;
        self.recency.remove(&slot.tick);
        self.occupied -= slot.entry.byte_size();
        Some(slot.entry)
    }

    fn evict_oldest(&mut self) -> Option<CacheKey> {
        let (_, key) = self.recency.pop_first()?;
        if let Some(slot) = self.entries.remove(&key) {
            self.occupied -= slot.entry.byte_size();
        }
        self.evictions += 1;
        Some(key)
    }

    fn evict_until(&mut self, target: usize) -> usize {
        let mut evicted = 0;
        while self.occupied > target {
            match self.evict_oldest() {
                Some(key) => {
                    debug!(key = %key, occupied = self.occupied, "evicted album art");
                    evicted += 1;
                }
                None => break,
            }
        }
        evicted
    }
}

impl ArtCache {
    /// Create a cache holding at most `capacity_bytes` of decoded pixels.
    pub fn new(capacity_bytes: usize) -> Result<Self, ArtError> {
        if capacity_bytes == 0 {
            return Err(ArtError::ZeroCapacity);
        }

        Ok(Self {
            capacity: capacity_bytes,
            inner: Mutex::new(Inner::default()),
        })
    }

    /// Look up a cover, marking it most recently used on a hit.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<ArtEntry>> {
        let mut inner = self.inner.lock();
        match inner.touch(key) {
            Some(entry) => {
                inner.hits += 1;
                Some(entry)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Presence check that leaves recency and counters alone.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.inner.lock().entries.contains_key(key)
    }

    /// Insert or replace the cover for `key`, then evict least recently used
    /// covers until the byte total fits the capacity again.
    ///
    /// An entry bigger than the whole capacity is not stored, though any older
    /// cover under the key is still dropped. The caller gets it back so it can
    /// be shown once.
    pub fn put(&self, key: CacheKey, entry: impl Into<ArtEntry>) -> Arc<ArtEntry> {
        let entry = Arc::new(entry.into());
        let size = entry.byte_size();

        let mut inner = self.inner.lock();
        // The new decode replaces the old cover even when it can't be kept
        inner.remove(&key);

        if size > self.capacity {
            debug!(
                key = %key,
                size,
                capacity = self.capacity,
                "album art larger than cache capacity, not caching"
            );
            return entry;
        }

        let tick = inner.next_tick;
        inner.next_tick += 1;
        inner.recency.insert(tick, key.clone());
        inner.entries.insert(
            key,
            Slot {
                entry: Arc::clone(&entry),
                tick,
            },
        );
        inner.occupied += size;
        inner.insertions += 1;

        inner.evict_until(self.capacity);
        entry
    }

    /// Drop one cover. Returns whether anything was removed.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        let removed = self.inner.lock().remove(key).is_some();
        if removed {
            debug!(key = %key, "invalidated album art");
        }
        removed
    }

    /// Drop every cover and reset the byte total. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let dropped = inner.entries.len();
        inner.entries.clear();
        inner.recency.clear();
        inner.occupied = 0;
        drop(inner);

        if dropped > 0 {
            info!(dropped, "cleared album art cache");
        }
        dropped
    }

    /// Evict least recently used covers until at most `target_bytes` remain.
    pub fn trim_to(&self, target_bytes: usize) -> usize {
        self.inner.lock().evict_until(target_bytes)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn occupied_bytes(&self) -> usize {
        self.inner.lock().occupied
    }

    pub fn capacity_bytes(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            entries: inner.entries.len(),
            occupied_bytes: inner.occupied,
            capacity_bytes: self.capacity,
            hits: inner.hits,
            misses: inner.misses,
            insertions: inner.insertions,
            evictions: inner.evictions,
        }
    }
}
