use std::time::Duration;

use attest_crypto::{HashAlgorithm, MerkleError, SignatureError};
use attest_store::BackendError;
use attest_types::EncodingError;

/// Errors produced by ledger operations.
///
/// Integrity findings are not errors: a tampered chain is reported as a
/// [`VerificationReport`](crate::VerificationReport) value.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Payload or metadata is not canonically representable. Nothing was
    /// written.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Storage failed. The chain did not advance.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// A bulk write failed. None of the batch is committed.
    #[error("batch of {size} entries failed to commit: {source}")]
    BatchCommit {
        size: usize,
        #[source]
        source: BackendError,
    },

    #[error("writer lock not acquired within {waited:?}")]
    ConcurrencyTimeout { waited: Duration },

    #[error("signing failed: {0}")]
    Signature(#[from] SignatureError),

    #[error("signing requested but no signer is configured")]
    SignerUnavailable,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("stored digests are {stored} bytes but {configured} produces {expected}")]
    AlgorithmMismatch {
        configured: HashAlgorithm,
        expected: usize,
        stored: usize,
    },

    #[error("batch is full ({capacity} entries)")]
    BatchFull { capacity: usize },

    /// A batch validator refused the entry. Nothing was buffered.
    #[error("entry rejected: {0}")]
    Rejected(String),

    #[error("invalid sequence range {start}..{end} for ledger of length {length}")]
    InvalidRange { start: u64, end: u64, length: u64 },

    #[error("entry {sequence} is missing from the backend")]
    MissingEntry { sequence: u64 },

    #[error("merkle error: {0}")]
    Merkle(#[from] MerkleError),

    #[error("entry {sequence} could not be decoded: {reason}")]
    Decode { sequence: u64, reason: String },

    #[error("ledger is closed")]
    Closed,

    #[error("background task failed: {0}")]
    TaskFailed(String),
}

/// Convenience alias for ledger results.
pub type LedgerResult<T> = Result<T, LedgerError>;
