use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use attest_store::StoredEntry;

use crate::entry::Entry;
use crate::error::{LedgerError, LedgerResult};
use crate::ledger::LedgerInner;

/// Lazy, paged scan over committed entries in ascending sequence order.
///
/// The end of the scan is fixed when the iterator is created. After the
/// first error the iterator is exhausted.
pub struct EntryIter {
    inner: Arc<LedgerInner>,
    next: u64,
    end: u64,
    page: VecDeque<StoredEntry>,
    done: bool,
}

impl EntryIter {
    pub(crate) fn new(inner: Arc<LedgerInner>, start: u64, end: u64) -> Self {
        Self {
            inner,
            next: start,
            end,
            page: VecDeque::new(),
            done: start >= end,
        }
    }

    fn advance(&mut self) {
        self.next += 1;
        if self.next >= self.end {
            self.done = true;
        }
    }

    fn fail(&mut self, error: LedgerError) -> Option<LedgerResult<Entry>> {
        self.done = true;
        self.page.clear();
        Some(Err(error))
    }
}

impl Iterator for EntryIter {
    type Item = LedgerResult<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        if self.page.is_empty() {
            if let Some(entry) = self.inner.cached(self.next) {
                self.advance();
                return Some(Ok(entry));
            }
            let want = (self.end - self.next).min(self.inner.config.verify_page_size as u64);
            match self.inner.backend.read_range(self.next, want as usize) {
                Ok(records) => self.page = records.into(),
                Err(e) => return self.fail(e.into()),
            }
        }

        let Some(stored) = self.page.pop_front() else {
            let sequence = self.next;
            return self.fail(LedgerError::MissingEntry { sequence });
        };
        if stored.sequence != self.next {
            let sequence = self.next;
            return self.fail(LedgerError::MissingEntry { sequence });
        }

        self.advance();
        Some(self.inner.decode(&stored))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.done {
            return (0, Some(0));
        }
        (0, Some((self.end - self.next) as usize))
    }
}

impl fmt::Debug for EntryIter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryIter")
            .field("next", &self.next)
            .field("end", &self.end)
            .field("buffered", &self.page.len())
            .finish()
    }
}
