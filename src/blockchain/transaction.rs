use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::account::AccountId;
use super::crypto::{verify_signature, CryptoError, DigitalSignature, PublicKey};
use super::encoding::{canonical_digest, EncodingError};

/// Errors that can occur during transaction operations
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Crypto error: {0}")]
    CryptoError(#[from] CryptoError),

    #[error("Encoding error: {0}")]
    EncodingError(#[from] EncodingError),
}

/// The signed part of a transaction.
///
/// Field declaration order is irrelevant: the canonical form sorts keys, giving
/// `nonce`, `receiver`, `sender`, `tx_metadata`, `value`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionMessage {
    pub sender: AccountId,
    pub receiver: AccountId,
    pub value: u64,
    #[serde(rename = "tx_metadata", default)]
    pub metadata: String,
    /// Sender's transaction counter. Recorded and signed, never enforced.
    pub nonce: u64,
}

impl TransactionMessage {
    /// Hex SHA-256 of the canonical encoding; this hex text is what gets signed
    pub fn digest_hex(&self) -> Result<String, EncodingError> {
        canonical_digest(self)
    }
}

/// An immutable signed envelope: `{message, signature}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    message: TransactionMessage,
    signature: DigitalSignature,
}

impl Transaction {
    /// Wraps a message and its signature. Nothing is checked here; the ledger
    /// verifies the signature on admission.
    pub fn new(message: TransactionMessage, signature: DigitalSignature) -> Self {
        Transaction { message, signature }
    }

    pub fn message(&self) -> &TransactionMessage {
        &self.message
    }

    pub fn signature(&self) -> &DigitalSignature {
        &self.signature
    }

    pub fn sender(&self) -> &AccountId {
        &self.message.sender
    }

    pub fn receiver(&self) -> &AccountId {
        &self.message.receiver
    }

    pub fn value(&self) -> u64 {
        self.message.value
    }

    /// Verifies the signature against the given sender key
    pub fn verify_signature(&self, public_key: &PublicKey) -> Result<bool, TransactionError> {
        let digest = self.message.digest_hex()?;

        verify_signature(digest.as_bytes(), &self.signature, public_key)
            .map_err(TransactionError::from)
    }
}
