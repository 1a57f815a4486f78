//! Chain engine for the attest ledger.
//!
//! Each [`Entry`] is bound to its predecessor by a content hash, so any later
//! modification, deletion or reordering of stored history is detected by
//! [`Ledger::verify_integrity`].
//!
//! # Key Types
//!
//! - [`Ledger`]: append/verify state machine over a storage [`Backend`](attest_store::Backend)
//! - [`Entry`]: one immutable, hash-chained record
//! - [`BatchProcessor`]: client-side buffer committed as one atomic unit
//! - [`VerificationReport`]: verification outcome; tampering is a value, not an error
//! - [`LedgerConfig`]: TOML-loadable settings

pub mod batch;
pub mod cache;
pub mod codec;
pub mod config;
pub mod entry;
pub mod error;
pub mod ledger;
mod lock;
pub mod monitor;
pub mod query;
pub mod verify;

pub use batch::{AutoFlush, BatchOutcome, BatchProcessor, BatchStats, Validator};
pub use cache::{CacheStats, EntryCache};
pub use codec::EntryCodec;
pub use config::LedgerConfig;
pub use entry::{preimage, Entry, ENTRY_DOMAIN};
pub use error::{LedgerError, LedgerResult};
pub use ledger::{AppendRequest, EntryStream, Ledger, LedgerBuilder, LedgerState, LedgerStats};
pub use monitor::VerificationMonitor;
pub use query::EntryIter;
pub use verify::{CancelFlag, IntegrityFailure, VerificationReport, VerifyOptions};
