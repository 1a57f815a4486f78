//! Paged chain verification.

use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use attest_crypto::{ChainFault, ChainRecord, ChainVerifier, ContentHasher, FailureReason, SignerRegistry};
use attest_store::{Backend, StoredEntry};
use attest_types::Digest;
use tracing::{info, warn};

use crate::codec::EntryCodec;
use crate::error::{LedgerError, LedgerResult};

/// First point at which a chain failed verification.
pub type IntegrityFailure = ChainFault;

/// Cooperative cancellation for long verifications.
///
/// Clones share one flag. Verification checks it between entries and
/// returns [`VerificationReport::Cancelled`] once it is set.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What to verify.
#[derive(Clone, Debug, Default)]
pub struct VerifyOptions {
    /// Sequences to check. Defaults to the whole chain. The end is clamped to
    /// the length observed when verification starts.
    pub range: Option<Range<u64>>,
    /// Compare the Merkle root over the checked entries against this value.
    pub expected_root: Option<Digest>,
    /// Report the Merkle root over the checked entries.
    pub merkle_root: bool,
    pub cancel: Option<CancelFlag>,
}

impl VerifyOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn range(mut self, range: Range<u64>) -> Self {
        self.range = Some(range);
        self
    }

    pub fn expected_root(mut self, root: Digest) -> Self {
        self.expected_root = Some(root);
        self
    }

    pub fn with_merkle_root(mut self) -> Self {
        self.merkle_root = true;
        self
    }

    pub fn cancel(mut self, flag: CancelFlag) -> Self {
        self.cancel = Some(flag);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelFlag::is_cancelled)
    }
}

/// Outcome of a verification run. Tampering is an ordinary value here,
/// not an error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VerificationReport {
    Valid {
        /// Content hash of the last checked entry, or the link the range
        /// started from when it was empty.
        head: Digest,
        /// Sequence one past the last checked entry.
        length: u64,
        checked: u64,
        merkle_root: Option<Digest>,
    },
    Failed(IntegrityFailure),
    Cancelled { checked: u64 },
}

impl VerificationReport {
    pub fn is_valid(&self) -> bool {
        matches!(self, VerificationReport::Valid { .. })
    }

    pub fn failure(&self) -> Option<&IntegrityFailure> {
        match self {
            VerificationReport::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

/// A persisted record viewed as a chain link. Decoding happens only when the
/// verifier asks for the preimage.
pub(crate) struct StoredRecord<'a> {
    pub(crate) stored: &'a StoredEntry,
    pub(crate) codec: &'a EntryCodec,
}

impl ChainRecord for StoredRecord<'_> {
    fn sequence(&self) -> u64 {
        self.stored.sequence
    }

    fn prev_hash(&self) -> &Digest {
        &self.stored.prev_hash
    }

    fn content_hash(&self) -> &Digest {
        &self.stored.content_hash
    }

    fn preimage(&self) -> Result<Vec<u8>, String> {
        let entry = self.codec.decode(self.stored).map_err(|e| e.to_string())?;
        entry.preimage().map_err(|e| e.to_string())
    }

    fn signature(&self) -> Option<&[u8]> {
        self.stored.signature.as_deref()
    }

    fn signer_id(&self) -> Option<&str> {
        self.stored.signer_id.as_deref()
    }
}

/// Everything a verification run reads. Holds no ledger state.
pub(crate) struct Verification<'a> {
    pub(crate) backend: &'a dyn Backend,
    pub(crate) codec: &'a EntryCodec,
    pub(crate) hasher: ContentHasher,
    pub(crate) signers: &'a SignerRegistry,
    pub(crate) page_size: usize,
}

impl Verification<'_> {
    /// Verify against a chain of `length` committed entries.
    pub(crate) fn run(&self, length: u64, options: &VerifyOptions) -> LedgerResult<VerificationReport> {
        let requested = options.range.clone().unwrap_or(0..length);
        let start = requested.start;
        let end = requested.end.min(length);
        if start > end {
            return Err(LedgerError::InvalidRange {
                start: requested.start,
                end: requested.end,
                length,
            });
        }

        info!(start, end, "verification started");

        let prev = match self.link_before(start)? {
            Ok(prev) => prev,
            Err(fault) => return Ok(self.failed(fault)),
        };
        let mut verifier = ChainVerifier::resume(self.hasher, self.signers, start, prev);
        if options.merkle_root || options.expected_root.is_some() {
            verifier = verifier.track_merkle();
        }

        'pages: while verifier.next_sequence() < end {
            let want = (end - verifier.next_sequence()).min(self.page_size as u64) as usize;
            let page = self.backend.read_range(verifier.next_sequence(), want)?;
            if page.is_empty() {
                break;
            }
            for stored in &page {
                if stored.sequence >= end {
                    break 'pages;
                }
                if options.cancelled() {
                    info!(checked = verifier.checked(), "verification cancelled");
                    return Ok(VerificationReport::Cancelled {
                        checked: verifier.checked(),
                    });
                }
                let record = StoredRecord {
                    stored,
                    codec: self.codec,
                };
                if let Err(fault) = verifier.check(&record) {
                    return Ok(self.failed(fault));
                }
            }
        }

        match verifier.finish(end, options.expected_root.as_ref()) {
            Ok(summary) => {
                info!(length = summary.length, checked = summary.checked, "verification passed");
                Ok(VerificationReport::Valid {
                    head: summary.head,
                    length: summary.length,
                    checked: summary.checked,
                    merkle_root: summary.merkle_root,
                })
            }
            Err(fault) => Ok(self.failed(fault)),
        }
    }

    /// Content hash the entry at `sequence` must link to.
    pub(crate) fn link_before(&self, sequence: u64) -> LedgerResult<Result<Digest, IntegrityFailure>> {
        if sequence == 0 {
            return Ok(Ok(self.hasher.genesis()));
        }
        let prev = sequence - 1;
        Ok(match self.backend.get(prev)? {
            Some(stored) => Ok(stored.content_hash),
            None => Err(ChainFault::new(
                prev,
                FailureReason::MissingEntry,
                "predecessor of the requested range is not stored",
            )),
        })
    }

    pub(crate) fn failed(&self, fault: IntegrityFailure) -> VerificationReport {
        warn!(
            sequence = fault.sequence,
            reason = %fault.reason,
            detail = %fault.detail,
            "integrity check failed"
        );
        VerificationReport::Failed(fault)
    }
}
