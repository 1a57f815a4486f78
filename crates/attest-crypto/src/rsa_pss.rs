use std::fmt;

use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::signer::{SignatureAlgorithm, SignatureError, Signer};

/// Accepted RSA modulus sizes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RsaModulus {
    Bits2048,
    Bits3072,
    Bits4096,
}

impl RsaModulus {
    /// Modulus length in bits.
    pub const fn bits(self) -> usize {
        match self {
            RsaModulus::Bits2048 => 2048,
            RsaModulus::Bits3072 => 3072,
            RsaModulus::Bits4096 => 4096,
        }
    }

    /// Map a bit length onto a supported size. Anything else is an
    /// [`SignatureError::InvalidKey`].
    pub fn from_bits(bits: usize) -> Result<Self, SignatureError> {
        match bits {
            2048 => Ok(RsaModulus::Bits2048),
            3072 => Ok(RsaModulus::Bits3072),
            4096 => Ok(RsaModulus::Bits4096),
            other => Err(SignatureError::InvalidKey(format!(
                "unsupported RSA modulus size {other}"
            ))),
        }
    }
}

/// RSA signer using PSS padding over SHA-256.
///
/// PSS is randomized: signing the same message twice yields different
/// signatures, all of which verify.
pub struct RsaSigner {
    id: String,
    modulus: RsaModulus,
    signing: Option<rsa::pss::SigningKey<Sha256>>,
    verifying: rsa::pss::VerifyingKey<Sha256>,
    public_der: Vec<u8>,
}

impl RsaSigner {
    /// Generate a fresh key pair. Slow for large moduli.
    pub fn generate(id: impl Into<String>, modulus: RsaModulus) -> Result<Self, SignatureError> {
        let mut rng = rand::rngs::OsRng;
        let private = RsaPrivateKey::new(&mut rng, modulus.bits())
            .map_err(|e| SignatureError::InvalidKey(e.to_string()))?;
        Self::from_private_key(id, private)
    }

    /// Wrap an existing private key.
    pub fn from_private_key(
        id: impl Into<String>,
        private: RsaPrivateKey,
    ) -> Result<Self, SignatureError> {
        let public = private.to_public_key();
        let mut signer = Self::from_public_key(id, public)?;
        signer.signing = Some(rsa::pss::SigningKey::<Sha256>::new(private));
        Ok(signer)
    }

    /// Parse a PKCS#8 DER private key.
    pub fn from_pkcs8_der(id: impl Into<String>, der: &[u8]) -> Result<Self, SignatureError> {
        let private = RsaPrivateKey::from_pkcs8_der(der)
            .map_err(|e| SignatureError::InvalidKey(e.to_string()))?;
        Self::from_private_key(id, private)
    }

    /// Create a verify-only signer from an SPKI DER public key.
    pub fn verify_only(id: impl Into<String>, spki_der: &[u8]) -> Result<Self, SignatureError> {
        let public = RsaPublicKey::from_public_key_der(spki_der)
            .map_err(|e| SignatureError::InvalidKey(e.to_string()))?;
        Self::from_public_key(id, public)
    }

    fn from_public_key(id: impl Into<String>, public: RsaPublicKey) -> Result<Self, SignatureError> {
        let modulus = RsaModulus::from_bits(public.size() * 8)?;
        let public_der = public
            .to_public_key_der()
            .map_err(|e| SignatureError::InvalidKey(e.to_string()))?
            .as_bytes()
            .to_vec();
        Ok(Self {
            id: id.into(),
            modulus,
            signing: None,
            verifying: rsa::pss::VerifyingKey::<Sha256>::new(public),
            public_der,
        })
    }

    /// Size of the key's modulus.
    pub fn modulus(&self) -> RsaModulus {
        self.modulus
    }

    /// PKCS#8 DER encoding of the private key, readable by
    /// [`from_pkcs8_der`](Self::from_pkcs8_der).
    pub fn to_pkcs8_der(&self) -> Result<Vec<u8>, SignatureError> {
        let key = self
            .signing
            .as_ref()
            .ok_or_else(|| SignatureError::VerifyOnly(self.id.clone()))?;
        let private: &RsaPrivateKey = key.as_ref();
        let der = private
            .to_pkcs8_der()
            .map_err(|e| SignatureError::InvalidKey(e.to_string()))?;
        Ok(der.as_bytes().to_vec())
    }
}

impl Signer for RsaSigner {
    fn signer_id(&self) -> &str {
        &self.id
    }

    fn algorithm(&self) -> SignatureAlgorithm {
        SignatureAlgorithm::RsaPss(self.modulus)
    }

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, SignatureError> {
        let key = self
            .signing
            .as_ref()
            .ok_or_else(|| SignatureError::VerifyOnly(self.id.clone()))?;
        let mut rng = rand::rngs::OsRng;
        let sig = key
            .try_sign_with_rng(&mut rng, message)
            .map_err(|e| SignatureError::SigningFailed(e.to_string()))?;
        Ok(sig.to_vec())
    }

    fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        match rsa::pss::Signature::try_from(signature) {
            Ok(sig) => self.verifying.verify(message, &sig).is_ok(),
            Err(_) => false,
        }
    }

    fn can_sign(&self) -> bool {
        self.signing.is_some()
    }

    fn public_key_bytes(&self) -> Vec<u8> {
        self.public_der.clone()
    }
}

impl fmt::Debug for RsaSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RsaSigner({}, {}, {})",
            self.id,
            self.modulus.bits(),
            if self.signing.is_some() { "<redacted>" } else { "verify-only" }
        )
    }
}
