use std::sync::Arc;

use attest_ledger::{AppendRequest, BatchProcessor, Ledger, LedgerError, VerifyOptions};
use attest_store::testing::FailingBackend;
use attest_store::{Backend, BackendError};
use serde_json::json;

fn ledger_over(backend: &Arc<FailingBackend>) -> Ledger {
    Ledger::builder(backend.clone()).open().unwrap()
}

fn requests(n: usize) -> Vec<AppendRequest> {
    (0..n).map(|i| AppendRequest::new(json!({ "row": i }))).collect()
}

#[test]
fn failed_single_append_rolls_back() {
    let backend = Arc::new(FailingBackend::new());
    let ledger = ledger_over(&backend);
    ledger.append(json!("kept")).unwrap();
    let before = ledger.get_stats();

    backend.fail_next_append();
    let err = ledger.append(json!("lost")).unwrap_err();
    assert!(matches!(err, LedgerError::Backend(BackendError::Unavailable(_))));
    assert_eq!(ledger.get_stats(), before);

    let next = ledger.append(json!("retry")).unwrap();
    assert_eq!(next.sequence(), 1);
    assert_eq!(next.prev_hash(), &before.head);
}

#[test]
fn failed_bulk_write_leaves_head_and_length() {
    let backend = Arc::new(FailingBackend::new());
    let ledger = ledger_over(&backend);
    ledger.append_batch(requests(3)).unwrap();
    let before = ledger.get_stats();

    backend.fail_next_append();
    let err = ledger.append_batch(requests(4)).unwrap_err();
    assert!(matches!(err, LedgerError::BatchCommit { size: 4, .. }));
    assert_eq!(ledger.get_stats(), before);
    assert_eq!(backend.inner().len(), 3);
    assert!(ledger.verify_integrity(VerifyOptions::default()).unwrap().is_valid());
}

#[test]
fn partial_bulk_persistence_is_never_committed() {
    for persisted in 0..5 {
        let backend = Arc::new(FailingBackend::new());
        let ledger = ledger_over(&backend);
        ledger.append(json!("genesis")).unwrap();
        let before = ledger.get_stats();

        backend.fail_next_bulk_after(persisted);
        let err = ledger.append_batch(requests(5)).unwrap_err();
        assert!(matches!(err, LedgerError::BatchCommit { size: 5, .. }));

        assert_eq!(ledger.len(), before.total_entries);
        assert_eq!(ledger.head(), before.head);
        // Readers only ever see the committed prefix.
        assert_eq!(ledger.get_entries(0, 100).unwrap().count(), 1);
        assert!(ledger.verify_integrity(VerifyOptions::default()).unwrap().is_valid());

        // Stray records block further writes instead of being chained over.
        if persisted > 0 {
            assert!(matches!(
                ledger.append(json!("next")),
                Err(LedgerError::Backend(BackendError::SequenceConflict { .. }))
            ));
            assert_eq!(backend.inner().count().unwrap(), 1 + persisted as u64);
        }
        assert_eq!(ledger.len(), 1);
    }
}

#[test]
fn reopen_ignores_records_of_an_incomplete_batch() {
    for persisted in 1..5 {
        let backend = Arc::new(FailingBackend::new());
        let ledger = ledger_over(&backend);
        ledger.append_batch(requests(2)).unwrap();
        let before = ledger.get_stats();

        backend.fail_next_bulk_after(persisted);
        assert!(ledger.append_batch(requests(5)).is_err());
        assert_eq!(backend.inner().count().unwrap(), 2 + persisted as u64);

        let reopened = Ledger::builder(backend.inner().clone()).open().unwrap();
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.head(), before.head);
        assert_eq!(reopened.get_stats().last_entry_time, before.last_entry_time);
        assert_eq!(reopened.get_entries(0, 100).unwrap().count(), 2);
        assert!(reopened.verify_integrity(VerifyOptions::default()).unwrap().is_valid());
        assert!(matches!(
            reopened.append(json!("next")),
            Err(LedgerError::Backend(BackendError::SequenceConflict { .. }))
        ));
    }
}

#[test]
fn reopen_after_incomplete_first_batch_starts_at_genesis() {
    let backend = Arc::new(FailingBackend::new());
    let ledger = ledger_over(&backend);
    backend.fail_next_bulk_after(3);
    assert!(ledger.append_batch(requests(4)).is_err());

    let reopened = Ledger::builder(backend.inner().clone()).open().unwrap();
    assert!(reopened.is_empty());
    assert!(reopened.head().is_zero());
    assert!(reopened.get_stats().last_entry_time.is_none());
}

#[test]
fn batch_processor_retains_buffer_across_failure() {
    let backend = Arc::new(FailingBackend::new());
    let ledger = ledger_over(&backend);
    let mut batch = BatchProcessor::new(ledger.clone(), 16);
    for request in requests(6) {
        batch.add_entry(request).unwrap();
    }

    backend.set_fail_appends(true);
    assert!(batch.flush().is_err());
    assert!(batch.flush().is_err());
    assert_eq!(batch.pending(), 6);
    assert!(ledger.is_empty());

    backend.set_fail_appends(false);
    let outcome = batch.flush().unwrap();
    assert_eq!(outcome.len(), 6);
    assert_eq!(ledger.len(), 6);
    assert_eq!(batch.stats().failed_flushes, 2);
}

#[test]
fn batch_and_single_appends_chain_together() {
    let backend = Arc::new(FailingBackend::new());
    let ledger = ledger_over(&backend);
    let mut batch = BatchProcessor::new(ledger.clone(), 4);

    ledger.append(json!("a")).unwrap();
    batch.add_entry(json!("b")).unwrap();
    batch.add_entry(json!("c")).unwrap();
    batch.flush().unwrap();
    ledger.append(json!("d")).unwrap();

    let entries: Vec<_> = ledger
        .get_entries(0, 10)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(entries.len(), 4);
    for pair in entries.windows(2) {
        assert_eq!(pair[1].prev_hash(), pair[0].content_hash());
    }
}

#[tokio::test]
async fn async_batch_failure_rolls_back() {
    let backend = Arc::new(FailingBackend::new());
    let ledger = ledger_over(&backend);
    backend.fail_next_append();
    let err = ledger.append_batch_async(requests(3)).await.unwrap_err();
    assert!(matches!(err, LedgerError::BatchCommit { size: 3, .. }));
    assert!(ledger.is_empty());
    assert!(ledger.head().is_zero());
}
