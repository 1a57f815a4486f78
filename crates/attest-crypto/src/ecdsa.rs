use std::fmt;

use p256::ecdsa::signature::{Signer as _, Verifier as _};
use serde::{Deserialize, Serialize};

use crate::signer::{SignatureAlgorithm, SignatureError, Signer};

/// Supported NIST curves. P-256 signs with SHA-256, P-384 with SHA-384.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EcdsaCurve {
    P256,
    P384,
}

impl EcdsaCurve {
    /// Length of a fixed-size `r ‖ s` signature.
    pub const fn signature_len(self) -> usize {
        match self {
            EcdsaCurve::P256 => 64,
            EcdsaCurve::P384 => 96,
        }
    }
}

impl fmt::Display for EcdsaCurve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EcdsaCurve::P256 => f.write_str("p256"),
            EcdsaCurve::P384 => f.write_str("p384"),
        }
    }
}

enum Keys {
    P256 {
        signing: Option<p256::ecdsa::SigningKey>,
        verifying: p256::ecdsa::VerifyingKey,
    },
    P384 {
        signing: Option<p384::ecdsa::SigningKey>,
        verifying: p384::ecdsa::VerifyingKey,
    },
}

/// ECDSA signer over a configurable curve.
///
/// Signatures are the fixed-size big-endian `r ‖ s` encoding, not DER.
pub struct EcdsaSigner {
    id: String,
    keys: Keys,
}

impl EcdsaSigner {
    /// Generate a new random key on `curve`.
    pub fn generate(id: impl Into<String>, curve: EcdsaCurve) -> Self {
        let mut rng = rand::rngs::OsRng;
        let keys = match curve {
            EcdsaCurve::P256 => {
                let signing = p256::ecdsa::SigningKey::random(&mut rng);
                Keys::P256 {
                    verifying: p256::ecdsa::VerifyingKey::from(&signing),
                    signing: Some(signing),
                }
            }
            EcdsaCurve::P384 => {
                let signing = p384::ecdsa::SigningKey::random(&mut rng);
                Keys::P384 {
                    verifying: p384::ecdsa::VerifyingKey::from(&signing),
                    signing: Some(signing),
                }
            }
        };
        Self { id: id.into(), keys }
    }

    /// Create from a big-endian secret scalar.
    pub fn from_secret_bytes(
        id: impl Into<String>,
        curve: EcdsaCurve,
        secret: &[u8],
    ) -> Result<Self, SignatureError> {
        let invalid = |e: p256::ecdsa::Error| SignatureError::InvalidKey(e.to_string());
        let keys = match curve {
            EcdsaCurve::P256 => {
                let signing = p256::ecdsa::SigningKey::from_slice(secret).map_err(invalid)?;
                Keys::P256 {
                    verifying: p256::ecdsa::VerifyingKey::from(&signing),
                    signing: Some(signing),
                }
            }
            EcdsaCurve::P384 => {
                let signing = p384::ecdsa::SigningKey::from_slice(secret).map_err(invalid)?;
                Keys::P384 {
                    verifying: p384::ecdsa::VerifyingKey::from(&signing),
                    signing: Some(signing),
                }
            }
        };
        Ok(Self { id: id.into(), keys })
    }

    /// Create a verify-only signer from a SEC1-encoded public point.
    pub fn verify_only(
        id: impl Into<String>,
        curve: EcdsaCurve,
        sec1_public_key: &[u8],
    ) -> Result<Self, SignatureError> {
        let invalid = |e: p256::ecdsa::Error| SignatureError::InvalidKey(e.to_string());
        let keys = match curve {
            EcdsaCurve::P256 => Keys::P256 {
                signing: None,
                verifying: p256::ecdsa::VerifyingKey::from_sec1_bytes(sec1_public_key)
                    .map_err(invalid)?,
            },
            EcdsaCurve::P384 => Keys::P384 {
                signing: None,
                verifying: p384::ecdsa::VerifyingKey::from_sec1_bytes(sec1_public_key)
                    .map_err(invalid)?,
            },
        };
        Ok(Self { id: id.into(), keys })
    }

    /// Big-endian secret scalar, accepted back by
    /// [`from_secret_bytes`](Self::from_secret_bytes). `None` when verify-only.
    pub fn secret_bytes(&self) -> Option<Vec<u8>> {
        match &self.keys {
            Keys::P256 { signing, .. } => signing.as_ref().map(|k| k.to_bytes().to_vec()),
            Keys::P384 { signing, .. } => signing.as_ref().map(|k| k.to_bytes().to_vec()),
        }
    }

    /// Curve this key lives on.
    pub fn curve(&self) -> EcdsaCurve {
        match self.keys {
            Keys::P256 { .. } => EcdsaCurve::P256,
            Keys::P384 { .. } => EcdsaCurve::P384,
        }
    }
}

impl Signer for EcdsaSigner {
    fn signer_id(&self) -> &str {
        &self.id
    }

    fn algorithm(&self) -> SignatureAlgorithm {
        SignatureAlgorithm::Ecdsa(self.curve())
    }

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, SignatureError> {
        let verify_only = || SignatureError::VerifyOnly(self.id.clone());
        match &self.keys {
            Keys::P256 { signing, .. } => {
                let key = signing.as_ref().ok_or_else(verify_only)?;
                let sig: p256::ecdsa::Signature = key
                    .try_sign(message)
                    .map_err(|e| SignatureError::SigningFailed(e.to_string()))?;
                Ok(sig.to_bytes().to_vec())
            }
            Keys::P384 { signing, .. } => {
                let key = signing.as_ref().ok_or_else(verify_only)?;
                let sig: p384::ecdsa::Signature = key
                    .try_sign(message)
                    .map_err(|e| SignatureError::SigningFailed(e.to_string()))?;
                Ok(sig.to_bytes().to_vec())
            }
        }
    }

    fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        match &self.keys {
            Keys::P256 { verifying, .. } => p256::ecdsa::Signature::from_slice(signature)
                .is_ok_and(|sig| verifying.verify(message, &sig).is_ok()),
            Keys::P384 { verifying, .. } => p384::ecdsa::Signature::from_slice(signature)
                .is_ok_and(|sig| verifying.verify(message, &sig).is_ok()),
        }
    }

    fn can_sign(&self) -> bool {
        match &self.keys {
            Keys::P256 { signing, .. } => signing.is_some(),
            Keys::P384 { signing, .. } => signing.is_some(),
        }
    }

    fn public_key_bytes(&self) -> Vec<u8> {
        match &self.keys {
            Keys::P256 { verifying, .. } => verifying.to_encoded_point(true).as_bytes().to_vec(),
            Keys::P384 { verifying, .. } => verifying.to_encoded_point(true).as_bytes().to_vec(),
        }
    }
}

impl fmt::Debug for EcdsaSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EcdsaSigner({}, {}, {})",
            self.id,
            self.curve(),
            if self.can_sign() { "<redacted>" } else { "verify-only" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_curves_sign_and_verify() {
        for curve in [EcdsaCurve::P256, EcdsaCurve::P384] {
            let signer = EcdsaSigner::generate("ec", curve);
            let sig = signer.sign(b"digest bytes").unwrap();
            assert_eq!(sig.len(), curve.signature_len());
            assert!(signer.verify(b"digest bytes", &sig));
            assert!(!signer.verify(b"other bytes", &sig));
        }
    }

    #[test]
    fn flipped_byte_fails() {
        let signer = EcdsaSigner::generate("ec", EcdsaCurve::P256);
        let mut sig = signer.sign(b"msg").unwrap();
        sig[0] ^= 0x80;
        assert!(!signer.verify(b"msg", &sig));
    }

    #[test]
    fn verify_only_roundtrip() {
        let signer = EcdsaSigner::generate("ec", EcdsaCurve::P384);
        let sig = signer.sign(b"msg").unwrap();
        let public =
            EcdsaSigner::verify_only("ec", EcdsaCurve::P384, &signer.public_key_bytes()).unwrap();
        assert!(public.verify(b"msg", &sig));
        assert!(matches!(public.sign(b"msg"), Err(SignatureError::VerifyOnly(_))));
        assert_eq!(public.algorithm(), SignatureAlgorithm::Ecdsa(EcdsaCurve::P384));
    }

    #[test]
    fn cross_curve_key_rejected() {
        let signer = EcdsaSigner::generate("ec", EcdsaCurve::P256);
        assert!(EcdsaSigner::verify_only("ec", EcdsaCurve::P384, &signer.public_key_bytes()).is_err());
    }

    #[test]
    fn secret_bytes_deterministic_public_key() {
        let secret = [0x11u8; 32];
        let a = EcdsaSigner::from_secret_bytes("a", EcdsaCurve::P256, &secret).unwrap();
        let b = EcdsaSigner::from_secret_bytes("b", EcdsaCurve::P256, &secret).unwrap();
        assert_eq!(a.public_key_bytes(), b.public_key_bytes());
    }

    #[test]
    fn exported_secret_restores_key() {
        for curve in [EcdsaCurve::P256, EcdsaCurve::P384] {
            let signer = EcdsaSigner::generate("ec", curve);
            let secret = signer.secret_bytes().unwrap();
            let restored = EcdsaSigner::from_secret_bytes("ec", curve, &secret).unwrap();
            assert_eq!(restored.public_key_bytes(), signer.public_key_bytes());
            assert!(signer.verify(b"msg", &restored.sign(b"msg").unwrap()));
        }
        let public = EcdsaSigner::verify_only(
            "ec",
            EcdsaCurve::P256,
            &EcdsaSigner::generate("ec", EcdsaCurve::P256).public_key_bytes(),
        )
        .unwrap();
        assert!(public.secret_bytes().is_none());
    }
}
