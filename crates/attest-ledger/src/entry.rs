use attest_crypto::ContentHasher;
use attest_types::{CanonicalEncoder, Digest, EncodingError, Value};
use chrono::{DateTime, SecondsFormat, Utc};

/// Domain tag at the start of every entry preimage.
pub const ENTRY_DOMAIN: &[u8] = b"attest-entry-v1";

/// One immutable, hash-chained ledger record.
///
/// Entries are only created by the ledger. There are no mutating methods;
/// a correction is a new entry.
#[derive(Clone, Debug, PartialEq)]
pub struct Entry {
    sequence: u64,
    timestamp: DateTime<Utc>,
    payload: Value,
    metadata: Option<Value>,
    prev_hash: Digest,
    content_hash: Digest,
    signature: Option<Vec<u8>>,
    signer_id: Option<String>,
}

impl Entry {
    /// Assemble an entry from its persisted fields. The content hash is taken
    /// as given, not recomputed.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        sequence: u64,
        timestamp: DateTime<Utc>,
        payload: Value,
        metadata: Option<Value>,
        prev_hash: Digest,
        content_hash: Digest,
        signature: Option<Vec<u8>>,
        signer_id: Option<String>,
    ) -> Self {
        Self {
            sequence,
            timestamp,
            payload,
            metadata,
            prev_hash,
            content_hash,
            signature,
            signer_id,
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn metadata(&self) -> Option<&Value> {
        self.metadata.as_ref()
    }

    pub fn prev_hash(&self) -> &Digest {
        &self.prev_hash
    }

    pub fn content_hash(&self) -> &Digest {
        &self.content_hash
    }

    pub fn signature(&self) -> Option<&[u8]> {
        self.signature.as_deref()
    }

    pub fn signer_id(&self) -> Option<&str> {
        self.signer_id.as_deref()
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    /// Canonical bytes the content hash covers.
    pub fn preimage(&self) -> Result<Vec<u8>, EncodingError> {
        preimage(
            self.sequence,
            &self.timestamp,
            &self.payload,
            self.metadata.as_ref(),
            &self.prev_hash,
        )
    }

    /// Recompute the content hash from the entry's own fields.
    pub fn recompute_hash(&self, hasher: &ContentHasher) -> Result<Digest, EncodingError> {
        Ok(hasher.digest(&self.preimage()?))
    }

    /// JSON rendering for display. Digests and signatures are hex.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "sequence": self.sequence,
            "timestamp": self.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
            "payload": self.payload.to_json(),
            "metadata": self.metadata.as_ref().map(Value::to_json),
            "prev_hash": self.prev_hash.to_hex(),
            "content_hash": self.content_hash.to_hex(),
            "signature": self.signature.as_ref().map(hex::encode),
            "signer_id": self.signer_id,
        })
    }
}

/// Canonical preimage of an entry:
/// `ENTRY_DOMAIN ‖ u64 sequence ‖ i64 seconds ‖ u32 nanos ‖ payload ‖
/// option(metadata) ‖ prev_hash`.
pub fn preimage(
    sequence: u64,
    timestamp: &DateTime<Utc>,
    payload: &Value,
    metadata: Option<&Value>,
    prev_hash: &Digest,
) -> Result<Vec<u8>, EncodingError> {
    let mut enc = CanonicalEncoder::new();
    enc.write_raw(ENTRY_DOMAIN);
    enc.write_u64(sequence);
    enc.write_i64(timestamp.timestamp());
    enc.write_u32(timestamp.timestamp_subsec_nanos());
    enc.write_value(payload)?;
    enc.write_option_value(metadata)?;
    enc.write_bytes(prev_hash.as_bytes());
    Ok(enc.finish())
}
