use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use attest_crypto::{Ed25519Signer, FailureReason, HashAlgorithm};
use attest_ledger::{AppendRequest, BatchProcessor, Ledger, LedgerConfig, VerifyOptions};
use attest_store::{FileBackend, FileBackendConfig, SyncMode, ZstdCompressor};
use serde_json::json;

fn open(path: &Path) -> (Arc<FileBackend>, Ledger) {
    let backend = Arc::new(
        FileBackend::open(
            path,
            FileBackendConfig {
                sync_mode: SyncMode::EveryWrite,
                ..FileBackendConfig::default()
            },
        )
        .unwrap(),
    );
    let ledger = Ledger::builder(backend.clone())
        .config(LedgerConfig {
            hash_algorithm: HashAlgorithm::Sha3_256,
            ..LedgerConfig::default()
        })
        .compression(Arc::new(ZstdCompressor::default()))
        .open()
        .unwrap();
    (backend, ledger)
}

#[test]
fn chain_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.log");

    let head = {
        let (_, ledger) = open(&path);
        ledger.append(json!({"action": "login", "user": "alice"})).unwrap();
        let mut batch = BatchProcessor::new(ledger.clone(), 8);
        for i in 0..5 {
            batch.add_entry(json!({ "row": i })).unwrap();
        }
        batch.flush().unwrap();
        ledger.append(json!({"action": "logout", "user": "alice"})).unwrap();
        let head = ledger.head();
        ledger.close().unwrap();
        head
    };

    let (backend, ledger) = open(&path);
    assert_eq!(backend.recovery().entries, 7);
    assert_eq!(backend.recovery().frames, 3);
    assert_eq!(ledger.len(), 7);
    assert_eq!(ledger.head(), head);
    assert!(ledger.verify_integrity(VerifyOptions::default()).unwrap().is_valid());

    let next = ledger.append(json!("after reopen")).unwrap();
    assert_eq!(next.sequence(), 7);
    assert_eq!(next.prev_hash(), &head);
}

#[test]
fn torn_batch_is_discarded_as_a_unit() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.log");
    {
        let (_, ledger) = open(&path);
        ledger.append(json!("kept")).unwrap();
        ledger
            .append_batch((0..4).map(|i| AppendRequest::new(json!(i))).collect())
            .unwrap();
        ledger.close().unwrap();
    }

    // Cut the last frame in half, as a crash mid-write would.
    let len = std::fs::metadata(&path).unwrap().len();
    let file = OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(len - 10).unwrap();
    drop(file);

    let (backend, ledger) = open(&path);
    assert!(backend.recovery().truncated_bytes > 0);
    assert_eq!(ledger.len(), 1);
    assert!(ledger.verify_integrity(VerifyOptions::default()).unwrap().is_valid());
}

#[test]
fn corrupted_frame_surfaces_as_integrity_failure() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.log");
    let first_frame_end = {
        let (backend, ledger) = open(&path);
        ledger.append(json!("zero")).unwrap();
        let end = backend.offset();
        ledger.append(json!("one")).unwrap();
        ledger.append(json!("two")).unwrap();
        ledger.close().unwrap();
        end
    };

    // Flip a byte inside the body of the second frame.
    let mut bytes = std::fs::read(&path).unwrap();
    bytes[first_frame_end as usize + 12] ^= 0xff;
    let mut file = OpenOptions::new().write(true).truncate(true).open(&path).unwrap();
    file.write_all(&bytes).unwrap();
    drop(file);

    let (backend, ledger) = open(&path);
    assert_eq!(backend.recovery().skipped_frames, 1);
    let report = ledger.verify_integrity(VerifyOptions::default()).unwrap();
    let failure = report.failure().unwrap();
    assert_eq!(failure.sequence, 1);
    assert_eq!(failure.reason, FailureReason::SequenceGap);
}

#[test]
fn signed_file_ledger_verifies_after_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("signed.log");
    let signer = Arc::new(Ed25519Signer::from_seed("local", [3u8; 32]));

    {
        let backend = Arc::new(FileBackend::open(&path, FileBackendConfig::default()).unwrap());
        let ledger = Ledger::builder(backend)
            .signer(signer.clone())
            .enable_signatures(true)
            .open()
            .unwrap();
        for i in 0..3 {
            ledger.append(json!({ "i": i })).unwrap();
        }
        ledger.close().unwrap();
    }

    let backend = Arc::new(FileBackend::open(&path, FileBackendConfig::default()).unwrap());
    let ledger = Ledger::builder(backend).signer(signer).open().unwrap();
    assert!(ledger.verify_integrity(VerifyOptions::default()).unwrap().is_valid());
    assert_eq!(ledger.find_by_signer("local").unwrap().len(), 3);
}
