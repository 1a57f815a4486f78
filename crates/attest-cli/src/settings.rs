//! `attest.toml` loading.
//!
//! ```toml
//! [ledger]
//! hash_algorithm = "sha256"
//! enable_signatures = true
//!
//! [storage]
//! path = "audit.log"
//! compression = true
//! sync_mode = "every_write"
//!
//! [signing]
//! algorithm = "ecdsa_p256"
//! key_file = "attest.key"
//! signer_id = "ops"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use attest_crypto::{EcdsaCurve, EcdsaSigner, Ed25519Signer, RsaSigner, Signer};
use attest_ledger::LedgerConfig;
use attest_store::{FileBackendConfig, ZstdCompressor};
use serde::Deserialize;
use tracing::debug;

pub const DEFAULT_CONFIG: &str = "attest.toml";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub ledger: LedgerConfig,
    pub storage: StorageSettings,
    pub signing: SigningSettings,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub path: PathBuf,
    pub compression: bool,
    pub zstd_level: i32,
    #[serde(flatten)]
    pub backend: FileBackendConfig,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("attest.log"),
            compression: false,
            zstd_level: ZstdCompressor::DEFAULT_LEVEL,
            backend: FileBackendConfig::default(),
        }
    }
}

/// Key type held in `[signing] key_file`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum KeyAlgorithm {
    #[default]
    Ed25519,
    EcdsaP256,
    EcdsaP384,
    RsaPss,
}

impl KeyAlgorithm {
    pub fn name(self) -> &'static str {
        match self {
            KeyAlgorithm::Ed25519 => "ed25519",
            KeyAlgorithm::EcdsaP256 => "ecdsa_p256",
            KeyAlgorithm::EcdsaP384 => "ecdsa_p384",
            KeyAlgorithm::RsaPss => "rsa_pss",
        }
    }

    pub fn curve(self) -> Option<EcdsaCurve> {
        match self {
            KeyAlgorithm::EcdsaP256 => Some(EcdsaCurve::P256),
            KeyAlgorithm::EcdsaP384 => Some(EcdsaCurve::P384),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SigningSettings {
    pub algorithm: KeyAlgorithm,
    /// Hex-encoded key written by `attest keygen`: the 32-byte seed for
    /// Ed25519, the secret scalar for ECDSA, PKCS#8 DER for RSA-PSS.
    pub key_file: Option<PathBuf>,
    pub signer_id: String,
}

impl Default for SigningSettings {
    fn default() -> Self {
        Self {
            algorithm: KeyAlgorithm::default(),
            key_file: None,
            signer_id: "local".into(),
        }
    }
}

impl Settings {
    /// Load `explicit`, or `attest.toml` in the working directory if it
    /// exists, or defaults.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => {
                let fallback = PathBuf::from(DEFAULT_CONFIG);
                if !fallback.exists() {
                    debug!("no {DEFAULT_CONFIG}; using defaults");
                    return Ok(Self::default());
                }
                fallback
            }
        };
        let text = fs::read_to_string(&path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let settings: Self = toml::from_str(text)?;
        settings.ledger.validate()?;
        Ok(settings)
    }

    /// The configured signer, if a key file is set.
    pub fn signer(&self) -> anyhow::Result<Option<Arc<dyn Signer>>> {
        let Some(path) = &self.signing.key_file else {
            return Ok(None);
        };
        let key = read_key(path)?;
        let id = self.signing.signer_id.clone();
        let algorithm = self.signing.algorithm;
        let invalid = || format!("{} is not a valid {} key", path.display(), algorithm.name());

        let signer: Arc<dyn Signer> = match algorithm {
            KeyAlgorithm::Ed25519 => {
                let seed = <[u8; 32]>::try_from(key.as_slice()).map_err(|_| {
                    anyhow::anyhow!("{}: expected 32 bytes, found {}", invalid(), key.len())
                })?;
                Arc::new(Ed25519Signer::from_seed(id, seed))
            }
            KeyAlgorithm::EcdsaP256 => Arc::new(
                EcdsaSigner::from_secret_bytes(id, EcdsaCurve::P256, &key).with_context(invalid)?,
            ),
            KeyAlgorithm::EcdsaP384 => Arc::new(
                EcdsaSigner::from_secret_bytes(id, EcdsaCurve::P384, &key).with_context(invalid)?,
            ),
            KeyAlgorithm::RsaPss => {
                Arc::new(RsaSigner::from_pkcs8_der(id, &key).with_context(invalid)?)
            }
        };
        debug!(signer_id = signer.signer_id(), algorithm = %signer.algorithm(), "loaded signing key");
        Ok(Some(signer))
    }
}

/// Hex-decode a key file.
pub fn read_key(path: &Path) -> anyhow::Result<Vec<u8>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading key file {}", path.display()))?;
    hex::decode(text.trim()).with_context(|| format!("key file {} is not hex", path.display()))
}
