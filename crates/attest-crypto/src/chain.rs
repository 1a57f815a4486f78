use std::fmt;

use attest_types::Digest;
use serde::{Deserialize, Serialize};

use crate::hasher::ContentHasher;
use crate::merkle::MerkleTree;
use crate::signer::SignerRegistry;

/// A record that participates in a hash chain.
pub trait ChainRecord {
    fn sequence(&self) -> u64;

    fn prev_hash(&self) -> &Digest;

    fn content_hash(&self) -> &Digest;

    /// Canonical bytes the content hash was computed over. An error means
    /// the record cannot be decoded and is reported as a hash mismatch.
    fn preimage(&self) -> Result<Vec<u8>, String>;

    fn signature(&self) -> Option<&[u8]>;

    fn signer_id(&self) -> Option<&str>;
}

/// Why a chain failed verification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
    /// Recomputed content hash differs from the stored one.
    HashMismatch,
    /// `prev_hash` does not equal the predecessor's content hash.
    LinkBroken,
    SignatureInvalid,
    /// A record carried an unexpected sequence number.
    SequenceGap,
    /// Fewer records were supplied than the chain length requires.
    MissingEntry,
    MerkleRootMismatch,
}

impl FailureReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            FailureReason::HashMismatch => "HASH_MISMATCH",
            FailureReason::LinkBroken => "LINK_BROKEN",
            FailureReason::SignatureInvalid => "SIGNATURE_INVALID",
            FailureReason::SequenceGap => "SEQUENCE_GAP",
            FailureReason::MissingEntry => "MISSING_ENTRY",
            FailureReason::MerkleRootMismatch => "MERKLE_ROOT_MISMATCH",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// First point at which a chain failed verification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{reason} at sequence {sequence}: {detail}")]
pub struct ChainFault {
    pub sequence: u64,
    pub reason: FailureReason,
    pub detail: String,
}

impl ChainFault {
    pub fn new(sequence: u64, reason: FailureReason, detail: impl Into<String>) -> Self {
        Self {
            sequence,
            reason,
            detail: detail.into(),
        }
    }
}

/// Result of a fully verified chain segment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainSummary {
    /// Content hash of the last verified record, or the starting link.
    pub head: Digest,
    /// Next expected sequence, i.e. the chain length when starting at 0.
    pub length: u64,
    /// Number of records checked by this verifier.
    pub checked: u64,
    /// Merkle root over the checked content hashes, when tracked.
    pub merkle_root: Option<Digest>,
}

/// Streaming hash chain verifier.
///
/// Fed one record at a time in sequence order. Per record it checks, in
/// order: sequence, content hash, link to the predecessor, and signature.
/// The first failure is returned and the verifier must not be fed further.
pub struct ChainVerifier<'a> {
    hasher: ContentHasher,
    signers: &'a SignerRegistry,
    next_sequence: u64,
    expected_prev: Digest,
    checked: u64,
    merkle: Option<MerkleTree>,
}

impl<'a> ChainVerifier<'a> {
    /// Verifier for a chain starting at genesis (sequence 0).
    pub fn new(hasher: ContentHasher, signers: &'a SignerRegistry) -> Self {
        let genesis = hasher.genesis();
        Self::resume(hasher, signers, 0, genesis)
    }

    /// Verifier for a segment starting at `sequence`, whose predecessor's
    /// content hash is `prev_hash`.
    pub fn resume(
        hasher: ContentHasher,
        signers: &'a SignerRegistry,
        sequence: u64,
        prev_hash: Digest,
    ) -> Self {
        Self {
            hasher,
            signers,
            next_sequence: sequence,
            expected_prev: prev_hash,
            checked: 0,
            merkle: None,
        }
    }

    /// Accumulate a Merkle tree over every checked content hash.
    pub fn track_merkle(mut self) -> Self {
        self.merkle = Some(MerkleTree::new(self.hasher.algorithm()));
        self
    }

    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    pub fn checked(&self) -> u64 {
        self.checked
    }

    pub fn head(&self) -> &Digest {
        &self.expected_prev
    }

    /// Check one record and advance.
    pub fn check<R: ChainRecord + ?Sized>(&mut self, record: &R) -> Result<(), ChainFault> {
        let seq = self.next_sequence;

        if record.sequence() != seq {
            return Err(ChainFault::new(
                seq,
                FailureReason::SequenceGap,
                format!("expected sequence {seq}, found {}", record.sequence()),
            ));
        }

        let preimage = record
            .preimage()
            .map_err(|e| ChainFault::new(seq, FailureReason::HashMismatch, e))?;
        let computed = self.hasher.digest(&preimage);
        if computed != *record.content_hash() {
            return Err(ChainFault::new(
                seq,
                FailureReason::HashMismatch,
                format!(
                    "stored {} but recomputed {}",
                    record.content_hash().short_hex(),
                    computed.short_hex()
                ),
            ));
        }

        if *record.prev_hash() != self.expected_prev {
            return Err(ChainFault::new(
                seq,
                FailureReason::LinkBroken,
                format!(
                    "prev_hash {} does not match predecessor {}",
                    record.prev_hash().short_hex(),
                    self.expected_prev.short_hex()
                ),
            ));
        }

        self.check_signature(seq, record)?;

        self.expected_prev = record.content_hash().clone();
        self.next_sequence += 1;
        self.checked += 1;
        if let Some(tree) = self.merkle.as_mut() {
            tree.add_leaf(record.content_hash().clone());
        }
        Ok(())
    }

    fn check_signature<R: ChainRecord + ?Sized>(
        &self,
        seq: u64,
        record: &R,
    ) -> Result<(), ChainFault> {
        let invalid = |detail: String| ChainFault::new(seq, FailureReason::SignatureInvalid, detail);
        match (record.signature(), record.signer_id()) {
            (None, None) => Ok(()),
            (Some(_), None) => Err(invalid("signature without signer_id".into())),
            (None, Some(id)) => Err(invalid(format!("signer_id {id} without signature"))),
            (Some(sig), Some(id)) => {
                let signer = self
                    .signers
                    .get(id)
                    .ok_or_else(|| invalid(format!("unknown signer {id}")))?;
                if signer.verify(record.content_hash().as_bytes(), sig) {
                    Ok(())
                } else {
                    Err(invalid(format!("signature by {id} does not verify")))
                }
            }
        }
    }

    /// Finish a segment that should end just before `end_sequence`.
    ///
    /// Reports [`FailureReason::MissingEntry`] if fewer records were fed, and
    /// [`FailureReason::MerkleRootMismatch`] if `expected_root` is given and
    /// differs from the tracked root.
    pub fn finish(
        mut self,
        end_sequence: u64,
        expected_root: Option<&Digest>,
    ) -> Result<ChainSummary, ChainFault> {
        if self.next_sequence < end_sequence {
            return Err(ChainFault::new(
                self.next_sequence,
                FailureReason::MissingEntry,
                format!(
                    "chain ends at {} but {end_sequence} entries were expected",
                    self.next_sequence
                ),
            ));
        }

        let merkle_root = match self.merkle.as_mut() {
            Some(tree) => {
                tree.build();
                tree.get_root().ok()
            }
            None => None,
        };

        if let Some(expected) = expected_root {
            let actual = merkle_root.clone().unwrap_or_else(|| self.hasher.genesis());
            if actual != *expected {
                return Err(ChainFault::new(
                    self.next_sequence.saturating_sub(1),
                    FailureReason::MerkleRootMismatch,
                    format!(
                        "merkle root {} does not match expected {}",
                        actual.short_hex(),
                        expected.short_hex()
                    ),
                ));
            }
        }

        Ok(ChainSummary {
            head: self.expected_prev,
            length: self.next_sequence,
            checked: self.checked,
            merkle_root,
        })
    }
}
