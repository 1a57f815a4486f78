use std::path::Path;
use std::time::Duration;

use attest_crypto::HashAlgorithm;
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};

/// Ledger-level settings.
///
/// Every field has a default, so a partial TOML table is valid:
///
/// ```toml
/// hash_algorithm = "sha512"
/// enable_signatures = true
/// lock_timeout_ms = 2000
/// cache_capacity = 1000
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Digest used for every entry of the chain.
    pub hash_algorithm: HashAlgorithm,
    /// Sign appends by default. Requires a signer at open.
    pub enable_signatures: bool,
    /// Upper bound on waiting for the writer lock. `None` waits forever.
    pub lock_timeout_ms: Option<u64>,
    /// Records fetched per backend read during verification and scans.
    pub verify_page_size: usize,
    /// Buffered entries per subscriber before it starts lagging.
    pub subscriber_capacity: usize,
    /// Decoded entries kept for reads. `0` disables the cache.
    pub cache_capacity: usize,
    /// Age after which a cached entry is re-read. `None` keeps entries
    /// until evicted.
    pub cache_ttl_ms: Option<u64>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            hash_algorithm: HashAlgorithm::default(),
            enable_signatures: false,
            lock_timeout_ms: None,
            verify_page_size: 1024,
            subscriber_capacity: 256,
            cache_capacity: 0,
            cache_ttl_ms: None,
        }
    }
}

impl LedgerConfig {
    pub fn from_toml_str(s: &str) -> LedgerResult<Self> {
        let config: Self = toml::from_str(s).map_err(|e| LedgerError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> LedgerResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            LedgerError::InvalidConfig(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> LedgerResult<()> {
        if self.verify_page_size == 0 {
            return Err(LedgerError::InvalidConfig(
                "verify_page_size must be at least 1".into(),
            ));
        }
        if self.subscriber_capacity == 0 {
            return Err(LedgerError::InvalidConfig(
                "subscriber_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout_ms.map(Duration::from_millis)
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl_ms.map(Duration::from_millis)
    }
}
