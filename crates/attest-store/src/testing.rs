//! Failure injection for ledger tests.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::error::{BackendError, BackendResult};
use crate::memory::InMemoryBackend;
use crate::record::StoredEntry;
use crate::traits::Backend;

/// Backend wrapper that fails on demand.
///
/// Wraps an [`InMemoryBackend`] so tests can inspect and tamper with what
/// was actually persisted.
pub struct FailingBackend {
    inner: Arc<InMemoryBackend>,
    fail_next_append: AtomicBool,
    fail_appends: AtomicBool,
    fail_reads: AtomicBool,
    /// When set, the next `append_many` persists this many records and then
    /// fails, breaking the all-or-nothing contract on purpose.
    partial_bulk: Mutex<Option<usize>>,
    append_delay: Mutex<Option<Duration>>,
    append_calls: AtomicU64,
}

impl FailingBackend {
    pub fn new() -> Self {
        Self::wrap(Arc::new(InMemoryBackend::new()))
    }

    pub fn wrap(inner: Arc<InMemoryBackend>) -> Self {
        Self {
            inner,
            fail_next_append: AtomicBool::new(false),
            fail_appends: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
            partial_bulk: Mutex::new(None),
            append_delay: Mutex::new(None),
            append_calls: AtomicU64::new(0),
        }
    }

    /// The wrapped backend.
    pub fn inner(&self) -> &Arc<InMemoryBackend> {
        &self.inner
    }

    /// Fail only the next `append_one`/`append_many`.
    pub fn fail_next_append(&self) {
        self.fail_next_append.store(true, Ordering::SeqCst);
    }

    /// Fail every append until turned off.
    pub fn set_fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    /// Fail every read until turned off.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make the next `append_many` persist `persisted` records, then fail.
    pub fn fail_next_bulk_after(&self, persisted: usize) {
        *self.partial_bulk.lock().unwrap_or_else(PoisonError::into_inner) = Some(persisted);
    }

    /// Sleep this long inside every append.
    pub fn set_append_delay(&self, delay: Option<Duration>) {
        *self.append_delay.lock().unwrap_or_else(PoisonError::into_inner) = delay;
    }

    /// Number of append calls received, including failed ones.
    pub fn append_calls(&self) -> u64 {
        self.append_calls.load(Ordering::SeqCst)
    }

    fn before_append(&self) -> BackendResult<()> {
        self.append_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.append_delay.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        if self.fail_next_append.swap(false, Ordering::SeqCst)
            || self.fail_appends.load(Ordering::SeqCst)
        {
            return Err(BackendError::Unavailable("injected append failure".into()));
        }
        Ok(())
    }

    fn before_read(&self) -> BackendResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("injected read failure".into()));
        }
        Ok(())
    }
}

impl Default for FailingBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for FailingBackend {
    fn append_one(&self, entry: &StoredEntry) -> BackendResult<()> {
        self.before_append()?;
        self.inner.append_one(entry)
    }

    fn append_many(&self, entries: &[StoredEntry]) -> BackendResult<()> {
        self.before_append()?;
        let partial = self
            .partial_bulk
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(persisted) = partial {
            let persisted = persisted.min(entries.len());
            self.inner.append_many(&entries[..persisted])?;
            return Err(BackendError::Unavailable(format!(
                "injected failure after {persisted} of {} records",
                entries.len()
            )));
        }
        self.inner.append_many(entries)
    }

    fn read_range(&self, start: u64, limit: usize) -> BackendResult<Vec<StoredEntry>> {
        self.before_read()?;
        self.inner.read_range(start, limit)
    }

    fn read_by_predicate(
        &self,
        predicate: &dyn Fn(&StoredEntry) -> bool,
    ) -> BackendResult<Vec<StoredEntry>> {
        self.before_read()?;
        self.inner.read_by_predicate(predicate)
    }

    fn count(&self) -> BackendResult<u64> {
        self.before_read()?;
        self.inner.count()
    }

    fn first(&self) -> BackendResult<Option<StoredEntry>> {
        self.before_read()?;
        self.inner.first()
    }

    fn last(&self) -> BackendResult<Option<StoredEntry>> {
        self.before_read()?;
        self.inner.last()
    }

    fn close(&self) -> BackendResult<()> {
        self.inner.close()
    }
}
