use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use tracing::debug;

use crate::error::{BackendError, BackendResult};
use crate::record::StoredEntry;
use crate::traits::{check_continuity, Backend};

/// In-memory backend.
///
/// Intended for tests and embedding. Records live in a `Vec` ordered by
/// sequence behind a `RwLock`; records are cloned on read and write.
pub struct InMemoryBackend {
    entries: RwLock<Vec<StoredEntry>>,
    closed: AtomicBool,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of records currently stored.
    pub fn len(&self) -> usize {
        self.read_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_entries().is_empty()
    }

    /// Rewrite a stored record in place, bypassing every backend invariant.
    ///
    /// Returns `false` if no record has that sequence.
    #[cfg(feature = "test-util")]
    pub fn tamper(&self, sequence: u64, f: impl FnOnce(&mut StoredEntry)) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        match entries.iter_mut().find(|e| e.sequence == sequence) {
            Some(entry) => {
                f(entry);
                true
            }
            None => false,
        }
    }

    /// Delete a stored record, leaving a hole in the sequence.
    #[cfg(feature = "test-util")]
    pub fn remove(&self, sequence: u64) -> Option<StoredEntry> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let pos = entries.iter().position(|e| e.sequence == sequence)?;
        Some(entries.remove(pos))
    }

    fn read_entries(&self) -> std::sync::RwLockReadGuard<'_, Vec<StoredEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_open(&self) -> BackendResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BackendError::Closed);
        }
        Ok(())
    }

    fn append_checked(&self, batch: &[StoredEntry]) -> BackendResult<()> {
        self.ensure_open()?;
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let expected = entries.last().map_or(0, |e| e.sequence + 1);
        check_continuity(expected, batch)?;
        entries.extend_from_slice(batch);
        debug!(first = expected, count = batch.len(), "in-memory append");
        Ok(())
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for InMemoryBackend {
    fn append_one(&self, entry: &StoredEntry) -> BackendResult<()> {
        self.append_checked(std::slice::from_ref(entry))
    }

    fn append_many(&self, entries: &[StoredEntry]) -> BackendResult<()> {
        // Continuity is checked before anything is pushed.
        self.append_checked(entries)
    }

    fn read_range(&self, start: u64, limit: usize) -> BackendResult<Vec<StoredEntry>> {
        self.ensure_open()?;
        let entries = self.read_entries();
        let from = entries.partition_point(|e| e.sequence < start);
        Ok(entries[from..].iter().take(limit).cloned().collect())
    }

    fn read_by_predicate(
        &self,
        predicate: &dyn Fn(&StoredEntry) -> bool,
    ) -> BackendResult<Vec<StoredEntry>> {
        self.ensure_open()?;
        Ok(self
            .read_entries()
            .iter()
            .filter(|e| predicate(e))
            .cloned()
            .collect())
    }

    fn count(&self) -> BackendResult<u64> {
        self.ensure_open()?;
        Ok(self.read_entries().len() as u64)
    }

    fn first(&self) -> BackendResult<Option<StoredEntry>> {
        self.ensure_open()?;
        Ok(self.read_entries().first().cloned())
    }

    fn last(&self) -> BackendResult<Option<StoredEntry>> {
        self.ensure_open()?;
        Ok(self.read_entries().last().cloned())
    }

    fn close(&self) -> BackendResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

impl std::fmt::Debug for InMemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBackend")
            .field("entry_count", &self.len())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}
