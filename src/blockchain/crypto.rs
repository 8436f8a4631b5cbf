use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{Pss, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use std::fmt;

/// Default modulus size for generated key pairs
pub const DEFAULT_KEY_BITS: usize = 2048;

/// Output length of SHA-256 in bytes
const SHA256_LEN: usize = 32;

/// Errors that can occur during cryptographic operations
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Failed to generate keypair: {0}")]
    KeypairGenerationError(String),

    #[error("Failed to sign message: {0}")]
    SigningError(String),

    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Encoding error: {0}")]
    EncodingError(String),

    #[error("Decoding error: {0}")]
    DecodingError(String),
}

/// Represents a digital signature (base64 of the raw PSS signature bytes)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DigitalSignature(pub String);

impl DigitalSignature {
    /// Encodes raw signature bytes
    pub fn from_bytes(bytes: &[u8]) -> Self {
        DigitalSignature(BASE64.encode(bytes))
    }

    /// Decodes the raw signature bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, CryptoError> {
        BASE64
            .decode(self.0.as_bytes())
            .map_err(|e| CryptoError::DecodingError(e.to_string()))
    }
}

impl fmt::Display for DigitalSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The published half of a key pair, kept together with its PEM encoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    key: RsaPublicKey,
    pem: String,
}

impl PublicKey {
    /// Parses a SubjectPublicKeyInfo PEM document
    pub fn from_pem(pem: &str) -> Result<Self, CryptoError> {
        let key = RsaPublicKey::from_public_key_pem(pem)
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;

        Ok(PublicKey {
            key,
            pem: pem.to_string(),
        })
    }

    fn from_key(key: RsaPublicKey) -> Result<Self, CryptoError> {
        let pem = key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| CryptoError::EncodingError(e.to_string()))?;

        Ok(PublicKey { key, pem })
    }

    /// Gets the PEM (SubjectPublicKeyInfo) encoding
    pub fn to_pem(&self) -> &str {
        &self.pem
    }

    /// Modulus size in bits
    pub fn bits(&self) -> usize {
        self.key.n().bits()
    }
}

/// Largest PSS salt the modulus allows for SHA-256 (emLen - hLen - 2)
fn max_salt_len(key: &RsaPublicKey) -> usize {
    let em_len = (key.n().bits() + 6) / 8;
    em_len.saturating_sub(SHA256_LEN + 2)
}

/// An RSA key pair. The private half never leaves this struct.
pub struct KeyPair {
    private_key: RsaPrivateKey,
    public_key: PublicKey,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("bits", &self.public_key.bits())
            .finish_non_exhaustive()
    }
}

impl KeyPair {
    /// Generates a fresh key pair with the default modulus size
    pub fn generate() -> Result<Self, CryptoError> {
        Self::generate_with_bits(DEFAULT_KEY_BITS)
    }

    /// Generates a fresh key pair with the given modulus size
    pub fn generate_with_bits(bits: usize) -> Result<Self, CryptoError> {
        let mut rng = OsRng;
        let private_key = RsaPrivateKey::new(&mut rng, bits)
            .map_err(|e| CryptoError::KeypairGenerationError(e.to_string()))?;
        let public_key = PublicKey::from_key(RsaPublicKey::from(&private_key))?;

        Ok(KeyPair {
            private_key,
            public_key,
        })
    }

    /// Gets the public half
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Signs a message with RSA-PSS (MGF1/SHA-256, maximum salt) over SHA-256
    pub fn sign(&self, message: &[u8]) -> Result<DigitalSignature, CryptoError> {
        let hashed = Sha256::digest(message);
        let padding = Pss::new_with_salt::<Sha256>(max_salt_len(&self.public_key.key));

        let signature = self
            .private_key
            .sign_with_rng(&mut OsRng, padding, &hashed)
            .map_err(|e| CryptoError::SigningError(e.to_string()))?;

        Ok(DigitalSignature::from_bytes(&signature))
    }
}

/// Verifies a signature against a message and public key
///
/// Returns `Ok(false)` for a well-formed signature that does not match, and an
/// error only when the signature text is not valid base64.
pub fn verify_signature(
    message: &[u8],
    signature: &DigitalSignature,
    public_key: &PublicKey,
) -> Result<bool, CryptoError> {
    let signature = signature.to_bytes()?;
    let hashed = Sha256::digest(message);
    let padding = Pss::new_with_salt::<Sha256>(max_salt_len(&public_key.key));

    match public_key.key.verify(padding, &hashed, &signature) {
        Ok(_) => Ok(true),
        Err(_) => Ok(false),
    }
}
