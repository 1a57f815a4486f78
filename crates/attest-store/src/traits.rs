use crate::error::BackendResult;
use crate::record::StoredEntry;

/// Number of records fetched per page by the default scan helpers.
pub const SCAN_PAGE_SIZE: usize = 512;

/// Storage capability consumed by the ledger.
///
/// All implementations must satisfy these invariants:
/// - Records are append-only. A backend never reorders or rewrites them.
/// - Every write continues the stored sequence: the first record written must
///   carry `last.sequence + 1` (or `0` when empty) and records within one
///   write must be consecutive. Anything else is a `SequenceConflict`.
/// - `append_many` is all-or-nothing: on error no record of the call is
///   visible to later reads.
/// - Reads return records in ascending `sequence` order.
/// - The backend never interprets payload bytes or recomputes hashes.
/// - All I/O errors are propagated, never silently ignored.
pub trait Backend: Send + Sync {
    /// Persist a single record.
    fn append_one(&self, entry: &StoredEntry) -> BackendResult<()>;

    /// Persist several consecutive records atomically.
    fn append_many(&self, entries: &[StoredEntry]) -> BackendResult<()>;

    /// Up to `limit` records with `sequence >= start`, ascending.
    fn read_range(&self, start: u64, limit: usize) -> BackendResult<Vec<StoredEntry>>;

    /// All records matching `predicate`, ascending.
    ///
    /// Default implementation pages through [`read_range`](Self::read_range).
    /// Backends with an index may override.
    fn read_by_predicate(
        &self,
        predicate: &dyn Fn(&StoredEntry) -> bool,
    ) -> BackendResult<Vec<StoredEntry>> {
        let mut matched = Vec::new();
        let mut next = 0u64;
        loop {
            let page = self.read_range(next, SCAN_PAGE_SIZE)?;
            let Some(last) = page.last() else {
                break;
            };
            next = last.sequence + 1;
            let full = page.len() == SCAN_PAGE_SIZE;
            matched.extend(page.into_iter().filter(|e| predicate(e)));
            if !full {
                break;
            }
        }
        Ok(matched)
    }

    /// The record with exactly this sequence, if stored.
    fn get(&self, sequence: u64) -> BackendResult<Option<StoredEntry>> {
        Ok(self
            .read_range(sequence, 1)?
            .into_iter()
            .next()
            .filter(|e| e.sequence == sequence))
    }

    /// Number of stored records.
    fn count(&self) -> BackendResult<u64>;

    /// Lowest-sequence record, or `None` when empty.
    fn first(&self) -> BackendResult<Option<StoredEntry>>;

    /// Highest-sequence record, including any left by a failed write.
    fn last(&self) -> BackendResult<Option<StoredEntry>>;

    /// Release resources. Later calls fail with `BackendError::Closed`.
    fn close(&self) -> BackendResult<()>;
}

/// Check that `entries` are consecutive and continue from `expected`.
pub(crate) fn check_continuity(expected: u64, entries: &[StoredEntry]) -> BackendResult<()> {
    for (offset, entry) in entries.iter().enumerate() {
        let want = expected + offset as u64;
        if entry.sequence != want {
            return Err(crate::error::BackendError::SequenceConflict {
                expected: want,
                found: entry.sequence,
            });
        }
    }
    Ok(())
}
