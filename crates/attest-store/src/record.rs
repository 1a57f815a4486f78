use std::fmt;

use attest_types::Digest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Compression applied to a record's payload and metadata bytes.
///
/// Recorded per entry so a ledger can read back records written under a
/// different compression setting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Codec {
    #[default]
    None,
    Zstd,
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Codec::None => f.write_str("none"),
            Codec::Zstd => f.write_str("zstd"),
        }
    }
}

/// A ledger entry as persisted by a backend.
///
/// Backends never interpret `payload` or `metadata`; they are opaque,
/// possibly compressed, byte strings. The hash fields are stored exactly as
/// the ledger computed them so that verification can detect any later
/// modification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEntry {
    pub sequence: u64,
    /// Seconds since the Unix epoch.
    pub timestamp_secs: i64,
    /// Sub-second nanoseconds.
    pub timestamp_nanos: u32,
    pub payload: Vec<u8>,
    pub metadata: Option<Vec<u8>>,
    pub prev_hash: Digest,
    pub content_hash: Digest,
    pub signature: Option<Vec<u8>>,
    pub signer_id: Option<String>,
    pub codec: Codec,
    /// Set on the last record of every write. Records after the last set
    /// marker belong to a write that never completed.
    pub commit: bool,
}

impl StoredEntry {
    /// The creation instant, if the stored seconds/nanos are in range.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.timestamp_secs, self.timestamp_nanos)
    }
}
