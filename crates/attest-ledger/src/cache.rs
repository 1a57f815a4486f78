//! Read cache of decoded entries.

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use lru::LruCache;

use crate::entry::Entry;

/// Counters of an [`EntryCache`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries dropped for capacity or age.
    pub evictions: u64,
    pub len: usize,
    pub capacity: usize,
}

impl CacheStats {
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

struct Slot {
    entry: Entry,
    stored: Instant,
}

struct State {
    slots: LruCache<u64, Slot>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Bounded LRU of committed entries keyed by sequence.
///
/// Committed entries are immutable, so a cached entry only goes stale if
/// storage is rewritten underneath the ledger. Integrity verification never
/// consults the cache.
pub struct EntryCache {
    state: Mutex<State>,
    ttl: Option<Duration>,
}

impl EntryCache {
    /// Cache holding at most `capacity` entries, each for at most `ttl`.
    pub fn new(capacity: NonZeroUsize, ttl: Option<Duration>) -> Self {
        Self {
            state: Mutex::new(State {
                slots: LruCache::new(capacity),
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
            ttl,
        }
    }

    pub fn get(&self, sequence: u64) -> Option<Entry> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let found = state
            .slots
            .get(&sequence)
            .map(|slot| (slot.entry.clone(), slot.stored));
        match found {
            Some((entry, stored)) if !self.expired(stored) => {
                state.hits += 1;
                Some(entry)
            }
            Some(_) => {
                state.slots.pop(&sequence);
                state.evictions += 1;
                state.misses += 1;
                None
            }
            None => {
                state.misses += 1;
                None
            }
        }
    }

    pub fn insert(&self, entry: Entry) {
        let sequence = entry.sequence();
        let slot = Slot {
            entry,
            stored: Instant::now(),
        };
        let mut state = self.lock();
        if let Some((displaced, _)) = state.slots.push(sequence, slot) {
            if displaced != sequence {
                state.evictions += 1;
            }
        }
    }

    pub fn clear(&self) {
        self.lock().slots.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            len: state.slots.len(),
            capacity: state.slots.cap().get(),
        }
    }

    fn expired(&self, stored: Instant) -> bool {
        self.ttl.is_some_and(|ttl| stored.elapsed() >= ttl)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for EntryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryCache")
            .field("stats", &self.stats())
            .field("ttl", &self.ttl)
            .finish()
    }
}
