mod common;

use std::sync::Arc;

use attest_crypto::{EcdsaCurve, EcdsaSigner, Ed25519Signer, FailureReason, Signer};
use attest_ledger::{AppendRequest, CancelFlag, Ledger, VerificationReport, VerifyOptions};
use attest_store::InMemoryBackend;
use attest_types::Digest;
use serde_json::json;

fn failure_of(ledger: &Ledger, options: VerifyOptions) -> (u64, FailureReason) {
    let report = ledger.verify_integrity(options).unwrap();
    let failure = report.failure().cloned().expect("expected a failure");
    (failure.sequence, failure.reason)
}

#[test]
fn modified_content_hash_is_hash_mismatch() {
    let (backend, ledger) = common::memory_ledger();
    common::fill(&ledger, 5);
    backend.tamper(3, |r| r.content_hash = Digest::from_bytes([7u8; 32]));
    assert_eq!(
        failure_of(&ledger, VerifyOptions::default()),
        (3, FailureReason::HashMismatch)
    );
}

#[test]
fn modified_prev_hash_is_detected_at_that_entry() {
    let (backend, ledger) = common::memory_ledger();
    common::fill(&ledger, 5);
    backend.tamper(2, |r| r.prev_hash = Digest::zero(32));
    // prev_hash is part of the preimage, so the recomputed hash differs first.
    assert_eq!(
        failure_of(&ledger, VerifyOptions::default()),
        (2, FailureReason::HashMismatch)
    );
}

#[test]
fn rehashed_forgery_breaks_the_next_link() {
    let (backend, ledger) = common::memory_ledger();
    common::fill(&ledger, 4);

    // Rewrite entry 1 and recompute its own hash consistently.
    let original = ledger.get_entry(1).unwrap().unwrap();
    let forged_payload = attest_types::Value::from(json!({"event": 999}));
    let preimage = attest_ledger::preimage(
        1,
        &original.timestamp(),
        &forged_payload,
        None,
        original.prev_hash(),
    )
    .unwrap();
    let forged_hash = attest_crypto::ContentHasher::new(ledger.hash_algorithm()).digest(&preimage);
    let payload_bytes = bincode::serialize(&forged_payload).unwrap();
    backend.tamper(1, |r| {
        r.payload = payload_bytes;
        r.content_hash = forged_hash;
    });

    assert_eq!(
        failure_of(&ledger, VerifyOptions::default()),
        (2, FailureReason::LinkBroken)
    );
}

#[test]
fn failure_index_does_not_depend_on_later_entries() {
    let (backend, ledger) = common::memory_ledger();
    common::fill(&ledger, 10);
    backend.tamper(4, |r| r.payload = bincode::serialize(&attest_types::Value::Null).unwrap());
    backend.tamper(7, |r| r.prev_hash = Digest::zero(32));

    let full = failure_of(&ledger, VerifyOptions::default());
    let prefix = failure_of(&ledger, VerifyOptions::new().range(0..5));
    assert_eq!(full, (4, FailureReason::HashMismatch));
    assert_eq!(prefix, full);
}

#[test]
fn deleted_entry_is_a_sequence_gap() {
    let (backend, ledger) = common::memory_ledger();
    common::fill(&ledger, 5);
    backend.remove(2).unwrap();
    assert_eq!(
        failure_of(&ledger, VerifyOptions::default()),
        (2, FailureReason::SequenceGap)
    );
}

#[test]
fn truncated_tail_is_missing_entry() {
    let (backend, ledger) = common::memory_ledger();
    common::fill(&ledger, 3);
    backend.remove(2).unwrap();
    assert_eq!(
        failure_of(&ledger, VerifyOptions::default()),
        (2, FailureReason::MissingEntry)
    );
}

#[test]
fn undecodable_payload_is_hash_mismatch() {
    let (backend, ledger) = common::memory_ledger();
    common::fill(&ledger, 2);
    backend.tamper(1, |r| r.payload = vec![0xde, 0xad]);
    assert_eq!(
        failure_of(&ledger, VerifyOptions::default()),
        (1, FailureReason::HashMismatch)
    );
    assert!(ledger.get_entry(1).is_err());
}

#[test]
fn flipped_signature_byte_is_signature_invalid() {
    let signer = Arc::new(Ed25519Signer::generate("ed"));
    let backend = Arc::new(InMemoryBackend::new());
    let ledger = Ledger::builder(backend.clone())
        .signer(signer)
        .enable_signatures(true)
        .open()
        .unwrap();
    common::fill(&ledger, 3);
    assert!(ledger.verify_integrity(VerifyOptions::default()).unwrap().is_valid());

    backend.tamper(1, |r| {
        if let Some(sig) = r.signature.as_mut() {
            sig[0] ^= 0x01;
        }
    });
    assert_eq!(
        failure_of(&ledger, VerifyOptions::default()),
        (1, FailureReason::SignatureInvalid)
    );
}

#[test]
fn stripped_signer_id_is_signature_invalid() {
    let backend = Arc::new(InMemoryBackend::new());
    let ledger = Ledger::builder(backend.clone())
        .signer(Arc::new(Ed25519Signer::generate("ed")))
        .open()
        .unwrap();
    ledger.append(AppendRequest::new("x").sign(true)).unwrap();
    backend.tamper(0, |r| r.signer_id = None);
    assert_eq!(
        failure_of(&ledger, VerifyOptions::default()),
        (0, FailureReason::SignatureInvalid)
    );
}

#[test]
fn unknown_signer_after_reopen_is_signature_invalid() {
    let backend = Arc::new(InMemoryBackend::new());
    let ledger = Ledger::builder(backend.clone())
        .signer(Arc::new(Ed25519Signer::generate("old-key")))
        .enable_signatures(true)
        .open()
        .unwrap();
    common::fill(&ledger, 2);

    let reopened = Ledger::builder(backend).open().unwrap();
    assert_eq!(
        failure_of(&reopened, VerifyOptions::default()),
        (0, FailureReason::SignatureInvalid)
    );
}

#[test]
fn retired_key_verifies_through_registry() {
    let old = Ed25519Signer::generate("old-key");
    let old_public = Ed25519Signer::verify_only("old-key", &old.public_key_bytes()).unwrap();
    let backend = Arc::new(InMemoryBackend::new());
    let ledger = Ledger::builder(backend.clone())
        .signer(Arc::new(old))
        .enable_signatures(true)
        .open()
        .unwrap();
    common::fill(&ledger, 2);

    let rotated = Ledger::builder(backend)
        .signer(Arc::new(EcdsaSigner::generate("new-key", EcdsaCurve::P256)))
        .verifier(Arc::new(old_public))
        .enable_signatures(true)
        .open()
        .unwrap();
    common::fill(&rotated, 2);

    assert!(rotated.verify_integrity(VerifyOptions::default()).unwrap().is_valid());
    assert_eq!(rotated.find_by_signer("old-key").unwrap().len(), 2);
    assert_eq!(rotated.find_by_signer("new-key").unwrap().len(), 2);
}

#[test]
fn range_verification_links_to_stored_predecessor() {
    let (backend, ledger) = common::memory_ledger();
    common::fill(&ledger, 10);

    let report = ledger.verify_integrity(VerifyOptions::new().range(4..8)).unwrap();
    match report {
        VerificationReport::Valid { length, checked, head, .. } => {
            assert_eq!(length, 8);
            assert_eq!(checked, 4);
            assert_eq!(&head, ledger.get_entry(7).unwrap().unwrap().content_hash());
        }
        other => panic!("unexpected {other:?}"),
    }

    // Tampering before the range is outside what was asked for.
    backend.tamper(1, |r| r.content_hash = Digest::zero(32));
    assert!(ledger.verify_integrity(VerifyOptions::new().range(4..8)).unwrap().is_valid());

    // Tampering with the predecessor's hash breaks the first link of the range.
    backend.tamper(3, |r| r.content_hash = Digest::zero(32));
    assert_eq!(
        failure_of(&ledger, VerifyOptions::new().range(4..8)),
        (4, FailureReason::LinkBroken)
    );
}

#[test]
fn range_end_is_clamped_and_inverted_range_rejected() {
    let (_, ledger) = common::memory_ledger();
    common::fill(&ledger, 3);
    let report = ledger.verify_integrity(VerifyOptions::new().range(0..100)).unwrap();
    assert!(matches!(report, VerificationReport::Valid { length: 3, .. }));
    assert!(ledger.verify_integrity(VerifyOptions::new().range(5..6)).is_err());
}

#[test]
fn wrong_expected_root_is_reported() {
    let (_, ledger) = common::memory_ledger();
    common::fill(&ledger, 5);
    let report = ledger
        .verify_integrity(VerifyOptions::new().expected_root(Digest::from_bytes([1u8; 32])))
        .unwrap();
    let failure = report.failure().unwrap();
    assert_eq!(failure.reason, FailureReason::MerkleRootMismatch);
    assert_eq!(failure.sequence, 4);
}

#[test]
fn cancelled_verification_has_no_side_effects() {
    let (_, ledger) = common::memory_ledger();
    common::fill(&ledger, 5);
    let cancel = CancelFlag::new();
    cancel.cancel();

    let report = ledger
        .verify_integrity(VerifyOptions::new().cancel(cancel))
        .unwrap();
    assert_eq!(report, VerificationReport::Cancelled { checked: 0 });
    assert_eq!(ledger.len(), 5);
    assert!(ledger.verify_integrity(VerifyOptions::default()).unwrap().is_valid());
}

#[test]
fn verify_entry_checks_one_link() {
    let (backend, ledger) = common::memory_ledger();
    common::fill(&ledger, 4);
    assert!(ledger.verify_entry(2).unwrap().is_valid());

    backend.tamper(2, |r| r.payload = bincode::serialize(&attest_types::Value::Null).unwrap());
    let report = ledger.verify_entry(2).unwrap();
    assert_eq!(report.failure().unwrap().reason, FailureReason::HashMismatch);
    assert!(ledger.verify_entry(3).unwrap().is_valid());
    assert!(ledger.verify_entry(4).is_err());
}
