mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use attest_crypto::{Ed25519Signer, FailureReason, Signer};
use attest_ledger::{AppendRequest, Ledger, VerificationReport, VerifyOptions};
use attest_store::InMemoryBackend;
use attest_types::{Digest, Value};
use proptest::prelude::*;

fn arb_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Int),
        any::<u64>().prop_map(Value::UInt),
        (-1.0e9f64..1.0e9).prop_map(Value::Float),
        "[a-z]{0,12}".prop_map(Value::String),
        proptest::collection::vec(any::<u8>(), 0..16).prop_map(Value::Bytes),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            proptest::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            proptest::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                .prop_map(|m: BTreeMap<String, Value>| Value::Map(m)),
        ]
    })
}

fn arb_request() -> impl Strategy<Value = AppendRequest> {
    (arb_value(), proptest::option::of(arb_value())).prop_map(|(payload, metadata)| {
        let request = AppendRequest::new(payload);
        match metadata {
            Some(m) => request.metadata(m),
            None => request,
        }
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn appended_chains_always_verify(requests in proptest::collection::vec(arb_request(), 0..24)) {
        let (_, ledger) = common::memory_ledger();
        let n = requests.len() as u64;
        for request in requests {
            ledger.append(request).unwrap();
        }
        let report = ledger.verify_integrity(VerifyOptions::default()).unwrap();
        let is_valid_with_length = matches!(report, VerificationReport::Valid { length, .. } if length == n);
        prop_assert!(is_valid_with_length);

        if let Some(first) = ledger.get_entry(0).unwrap() {
            prop_assert!(first.prev_hash().is_zero());
        }
    }

    #[test]
    fn batches_verify_like_single_appends(
        sizes in proptest::collection::vec(1usize..6, 1..6),
    ) {
        let (_, ledger) = common::memory_ledger();
        let mut total = 0u64;
        for (b, size) in sizes.into_iter().enumerate() {
            let batch = (0..size)
                .map(|i| AppendRequest::new(Value::map([("b", b as u64), ("i", i as u64)])))
                .collect();
            total += ledger.append_batch(batch).unwrap().len() as u64;
        }
        prop_assert_eq!(ledger.len(), total);
        prop_assert!(ledger.verify_integrity(VerifyOptions::default()).unwrap().is_valid());
    }

    #[test]
    fn any_single_tamper_fails_at_its_index(
        n in 2u64..16,
        target in 0u64..16,
        field in 0u8..3,
    ) {
        let target = target % n;
        let (backend, ledger) = common::memory_ledger();
        common::fill(&ledger, n);

        backend.tamper(target, |r| match field {
            0 => r.payload = bincode::serialize(&Value::from("forged")).unwrap(),
            1 => r.prev_hash = Digest::from_bytes([0xab; 32]),
            _ => r.content_hash = Digest::from_bytes([0xcd; 32]),
        });

        let report = ledger.verify_integrity(VerifyOptions::default()).unwrap();
        let failure = report.failure().cloned().unwrap();
        prop_assert_eq!(failure.sequence, target);
        prop_assert_eq!(failure.reason, FailureReason::HashMismatch);
    }

    #[test]
    fn signatures_roundtrip_and_reject_flips(n in 1u64..8, flip in 0usize..64) {
        let signer = Arc::new(Ed25519Signer::generate("prop"));
        let ledger = Ledger::builder(Arc::new(InMemoryBackend::new()))
            .signer(signer.clone())
            .enable_signatures(true)
            .open()
            .unwrap();
        common::fill(&ledger, n);

        for entry in ledger.get_entries(0, usize::MAX).unwrap() {
            let entry = entry.unwrap();
            let signature = entry.signature().unwrap();
            prop_assert!(signer.verify(entry.content_hash().as_bytes(), signature));

            let mut flipped = signature.to_vec();
            flipped[flip % signature.len()] ^= 0x80;
            prop_assert!(!signer.verify(entry.content_hash().as_bytes(), &flipped));
        }
    }
}
