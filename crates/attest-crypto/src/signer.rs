use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::ecdsa::EcdsaCurve;
use crate::rsa_pss::RsaModulus;

/// Asymmetric sign/verify capability.
///
/// Concrete variants are chosen at construction time. The message handed to
/// a signer is always the raw bytes of an entry's content hash, so cost does
/// not depend on payload size.
pub trait Signer: Send + Sync {
    /// Identifier recorded next to every signature this signer produces.
    fn signer_id(&self) -> &str;

    /// Scheme and parameters of this key.
    fn algorithm(&self) -> SignatureAlgorithm;

    /// Sign a message. Fails with [`SignatureError::VerifyOnly`] when the
    /// signer holds only public key material.
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, SignatureError>;

    /// Verify a signature. Malformed signatures are `false`, never errors.
    fn verify(&self, message: &[u8], signature: &[u8]) -> bool;

    /// Whether [`sign`](Self::sign) can succeed.
    fn can_sign(&self) -> bool;

    /// Encoded public key (raw for Ed25519, SEC1 for ECDSA, SPKI DER for RSA).
    fn public_key_bytes(&self) -> Vec<u8>;
}

/// Signature scheme and its parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureAlgorithm {
    Ed25519,
    Ecdsa(EcdsaCurve),
    RsaPss(RsaModulus),
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignatureAlgorithm::Ed25519 => write!(f, "ed25519"),
            SignatureAlgorithm::Ecdsa(curve) => write!(f, "ecdsa-{curve}"),
            SignatureAlgorithm::RsaPss(modulus) => write!(f, "rsa-pss-{}", modulus.bits()),
        }
    }
}

/// Lookup table from `signer_id` to the capability that verifies it.
///
/// Verification selects the signer recorded on each entry, so a ledger that
/// has rotated keys keeps old verify-only signers registered here.
#[derive(Clone, Default)]
pub struct SignerRegistry {
    signers: HashMap<String, Arc<dyn Signer>>,
}

impl SignerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a signer under its own id, returning any signer it replaced.
    pub fn register(&mut self, signer: Arc<dyn Signer>) -> Option<Arc<dyn Signer>> {
        self.signers.insert(signer.signer_id().to_string(), signer)
    }

    /// The signer registered as `signer_id`.
    pub fn get(&self, signer_id: &str) -> Option<&Arc<dyn Signer>> {
        self.signers.get(signer_id)
    }

    /// Whether registering a signer with this id would replace one.
    pub fn contains(&self, signer_id: &str) -> bool {
        self.signers.contains_key(signer_id)
    }

    /// Verify `signature` over `message` with the signer registered as
    /// `signer_id`. Unknown ids verify as `false`.
    pub fn verify(&self, signer_id: &str, message: &[u8], signature: &[u8]) -> bool {
        self.signers
            .get(signer_id)
            .is_some_and(|s| s.verify(message, signature))
    }

    pub fn len(&self) -> usize {
        self.signers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signers.is_empty()
    }

    /// Registered ids in sorted order.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.signers.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl fmt::Debug for SignerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignerRegistry")
            .field("signers", &self.ids())
            .finish()
    }
}

/// Errors from signing operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("signer {0} holds only a public key")]
    VerifyOnly(String),

    #[error("signing failed: {0}")]
    SigningFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ed25519::Ed25519Signer;

    #[test]
    fn registry_selects_by_id() {
        let a = Ed25519Signer::generate("a");
        let b = Ed25519Signer::generate("b");
        let sig = a.sign(b"msg").unwrap();

        let mut registry = SignerRegistry::new();
        registry.register(Arc::new(a));
        registry.register(Arc::new(b));

        assert_eq!(registry.len(), 2);
        assert!(registry.verify("a", b"msg", &sig));
        assert!(!registry.verify("b", b"msg", &sig));
        assert!(!registry.verify("missing", b"msg", &sig));
        assert_eq!(registry.ids(), vec!["a", "b"]);
    }

    #[test]
    fn register_replaces_same_id() {
        let mut registry = SignerRegistry::new();
        assert!(registry.register(Arc::new(Ed25519Signer::generate("k"))).is_none());
        assert!(registry.register(Arc::new(Ed25519Signer::generate("k"))).is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn algorithm_display() {
        assert_eq!(SignatureAlgorithm::Ed25519.to_string(), "ed25519");
        assert_eq!(
            SignatureAlgorithm::Ecdsa(EcdsaCurve::P384).to_string(),
            "ecdsa-p384"
        );
        assert_eq!(
            SignatureAlgorithm::RsaPss(RsaModulus::Bits3072).to_string(),
            "rsa-pss-3072"
        );
    }
}
