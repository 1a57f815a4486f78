use std::fmt;
use std::str::FromStr;

use attest_types::Digest;
use serde::{Deserialize, Serialize};
use sha2::Digest as _;

/// Hash algorithms a ledger can be configured with.
///
/// One algorithm is chosen per ledger and never changes; it is not recorded
/// per entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Sha512,
    Sha3_256,
    Sha3_512,
    Blake3,
}

impl HashAlgorithm {
    pub const ALL: [HashAlgorithm; 5] = [
        HashAlgorithm::Sha256,
        HashAlgorithm::Sha512,
        HashAlgorithm::Sha3_256,
        HashAlgorithm::Sha3_512,
        HashAlgorithm::Blake3,
    ];

    /// Digest width in bytes.
    pub const fn output_len(self) -> usize {
        match self {
            HashAlgorithm::Sha256 | HashAlgorithm::Sha3_256 | HashAlgorithm::Blake3 => 32,
            HashAlgorithm::Sha512 | HashAlgorithm::Sha3_512 => 64,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha512 => "sha512",
            HashAlgorithm::Sha3_256 => "sha3_256",
            HashAlgorithm::Sha3_512 => "sha3_512",
            HashAlgorithm::Blake3 => "blake3",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = HasherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalised = s.to_ascii_lowercase().replace('-', "_");
        HashAlgorithm::ALL
            .into_iter()
            .find(|a| a.name() == normalised)
            .ok_or_else(|| HasherError::UnknownAlgorithm(s.to_string()))
    }
}

/// Content hasher bound to one algorithm.
///
/// Unlike a domain-tagged hasher, this one hashes bytes exactly as given;
/// callers that need domain separation put the tag in the preimage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContentHasher {
    algorithm: HashAlgorithm,
}

impl ContentHasher {
    pub const fn new(algorithm: HashAlgorithm) -> Self {
        Self { algorithm }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn output_len(&self) -> usize {
        self.algorithm.output_len()
    }

    /// Hash raw bytes.
    pub fn digest(&self, data: &[u8]) -> Digest {
        match self.algorithm {
            HashAlgorithm::Sha256 => Digest::from_bytes(sha2::Sha256::digest(data).to_vec()),
            HashAlgorithm::Sha512 => Digest::from_bytes(sha2::Sha512::digest(data).to_vec()),
            HashAlgorithm::Sha3_256 => Digest::from_bytes(sha3::Sha3_256::digest(data).to_vec()),
            HashAlgorithm::Sha3_512 => Digest::from_bytes(sha3::Sha3_512::digest(data).to_vec()),
            HashAlgorithm::Blake3 => Digest::from(*blake3::hash(data).as_bytes()),
        }
    }

    /// Hash the concatenation `left ‖ right`.
    pub fn digest_pair(&self, left: &Digest, right: &Digest) -> Digest {
        let mut buf = Vec::with_capacity(left.len() + right.len());
        buf.extend_from_slice(left.as_bytes());
        buf.extend_from_slice(right.as_bytes());
        self.digest(&buf)
    }

    /// The genesis sentinel: the all-zero digest of this algorithm's width.
    pub fn genesis(&self) -> Digest {
        Digest::zero(self.output_len())
    }
}

impl From<HashAlgorithm> for ContentHasher {
    fn from(algorithm: HashAlgorithm) -> Self {
        Self::new(algorithm)
    }
}

/// Errors from hashing configuration.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HasherError {
    #[error("unknown hash algorithm: {0}")]
    UnknownAlgorithm(String),
}
