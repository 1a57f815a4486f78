use ed25519_dalek::{Signer as _, Verifier as _};

use crate::signer::{SignatureAlgorithm, SignatureError, Signer};

/// Ed25519 signer.
///
/// Built either from a 32-byte secret seed (can sign) or from a 32-byte
/// public key (verify only).
pub struct Ed25519Signer {
    id: String,
    signing: Option<ed25519_dalek::SigningKey>,
    verifying: ed25519_dalek::VerifyingKey,
}

impl Ed25519Signer {
    /// Generate a new random key.
    pub fn generate(id: impl Into<String>) -> Self {
        let mut csprng = rand::rngs::OsRng;
        Self::from_signing_key(id, ed25519_dalek::SigningKey::generate(&mut csprng))
    }

    /// Create from a raw 32-byte secret seed.
    pub fn from_seed(id: impl Into<String>, seed: [u8; 32]) -> Self {
        Self::from_signing_key(id, ed25519_dalek::SigningKey::from_bytes(&seed))
    }

    /// Create a verify-only signer from a raw 32-byte public key.
    pub fn verify_only(id: impl Into<String>, public_key: &[u8]) -> Result<Self, SignatureError> {
        let bytes: [u8; 32] = public_key
            .try_into()
            .map_err(|_| SignatureError::InvalidKey("expected 32-byte public key".into()))?;
        let verifying = ed25519_dalek::VerifyingKey::from_bytes(&bytes)
            .map_err(|e| SignatureError::InvalidKey(e.to_string()))?;
        Ok(Self {
            id: id.into(),
            signing: None,
            verifying,
        })
    }

    fn from_signing_key(id: impl Into<String>, signing: ed25519_dalek::SigningKey) -> Self {
        let verifying = signing.verifying_key();
        Self {
            id: id.into(),
            signing: Some(signing),
            verifying,
        }
    }

    /// Raw secret seed, if this signer holds one.
    pub fn seed(&self) -> Option<[u8; 32]> {
        self.signing.as_ref().map(|k| k.to_bytes())
    }
}

impl Signer for Ed25519Signer {
    fn signer_id(&self) -> &str {
        &self.id
    }

    fn algorithm(&self) -> SignatureAlgorithm {
        SignatureAlgorithm::Ed25519
    }

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, SignatureError> {
        let key = self
            .signing
            .as_ref()
            .ok_or_else(|| SignatureError::VerifyOnly(self.id.clone()))?;
        Ok(key.sign(message).to_bytes().to_vec())
    }

    fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        match ed25519_dalek::Signature::from_slice(signature) {
            Ok(sig) => self.verifying.verify(message, &sig).is_ok(),
            Err(_) => false,
        }
    }

    fn can_sign(&self) -> bool {
        self.signing.is_some()
    }

    fn public_key_bytes(&self) -> Vec<u8> {
        self.verifying.to_bytes().to_vec()
    }
}

impl std::fmt::Debug for Ed25519Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Ed25519Signer({}, {}, {})",
            self.id,
            hex::encode(self.verifying.to_bytes()),
            if self.signing.is_some() { "<redacted>" } else { "verify-only" }
        )
    }
}
