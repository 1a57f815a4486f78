#![allow(dead_code)]

use std::sync::Arc;

use attest_ledger::{AppendRequest, Ledger, LedgerConfig};
use attest_store::InMemoryBackend;
use serde_json::json;

pub fn memory_ledger() -> (Arc<InMemoryBackend>, Ledger) {
    memory_ledger_with(LedgerConfig::default())
}

pub fn memory_ledger_with(config: LedgerConfig) -> (Arc<InMemoryBackend>, Ledger) {
    let backend = Arc::new(InMemoryBackend::new());
    let ledger = Ledger::builder(backend.clone())
        .config(config)
        .open()
        .expect("open in-memory ledger");
    (backend, ledger)
}

/// Append `n` events of the form `{"event": i}`.
pub fn fill(ledger: &Ledger, n: u64) {
    for i in 0..n {
        ledger
            .append(AppendRequest::new(json!({ "event": i })))
            .expect("append");
    }
}
