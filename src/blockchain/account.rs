use serde::{Deserialize, Serialize};
use thiserror::Error;

use std::borrow::Borrow;
use std::fmt;

use super::crypto::{CryptoError, KeyPair, PublicKey, DEFAULT_KEY_BITS};
use super::encoding::EncodingError;
use super::transaction::{Transaction, TransactionMessage};

/// Balance given to an identity created without an explicit one
pub const DEFAULT_INITIAL_BALANCE: u64 = 100;

/// Errors that can occur during account operations
#[derive(Debug, Error)]
pub enum AccountError {
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: u64, available: u64 },

    #[error("Balance overflow crediting {amount} to {balance}")]
    BalanceOverflow { balance: u64, amount: u64 },

    #[error("Crypto error: {0}")]
    CryptoError(#[from] CryptoError),

    #[error("Encoding error: {0}")]
    EncodingError(#[from] EncodingError),
}

/// Strongly typed account identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub String);

impl AccountId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AccountId {
    fn from(id: &str) -> Self {
        AccountId(id.to_string())
    }
}

impl From<String> for AccountId {
    fn from(id: String) -> Self {
        AccountId(id)
    }
}

impl Borrow<str> for AccountId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// An account's cryptographic persona: key pair plus its transaction counter.
///
/// Balances are owned by the ledger's [`Account`] record; the identity only
/// remembers the balance it was created with so it can be registered.
#[derive(Debug)]
pub struct Identity {
    id: AccountId,
    initial_balance: u64,
    nonce: u64,
    keys: KeyPair,
}

impl Identity {
    /// Creates an identity with a fresh 2048-bit key pair
    pub fn new(id: impl Into<AccountId>, initial_balance: u64) -> Result<Self, AccountError> {
        Self::with_key_bits(id, initial_balance, DEFAULT_KEY_BITS)
    }

    /// Creates an identity holding [`DEFAULT_INITIAL_BALANCE`]
    pub fn with_default_balance(id: impl Into<AccountId>) -> Result<Self, AccountError> {
        Self::new(id, DEFAULT_INITIAL_BALANCE)
    }

    /// Creates an identity with a key pair of the given modulus size
    pub fn with_key_bits(
        id: impl Into<AccountId>,
        initial_balance: u64,
        key_bits: usize,
    ) -> Result<Self, AccountError> {
        Ok(Identity {
            id: id.into(),
            initial_balance,
            nonce: 0,
            keys: KeyPair::generate_with_bits(key_bits)?,
        })
    }

    pub fn id(&self) -> &AccountId {
        &self.id
    }

    pub fn initial_balance(&self) -> u64 {
        self.initial_balance
    }

    /// Nonce of the most recently signed transaction (0 before the first one)
    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn public_key(&self) -> &PublicKey {
        self.keys.public_key()
    }

    /// PEM (SubjectPublicKeyInfo) encoding of the public key
    pub fn public_key_pem(&self) -> &str {
        self.keys.public_key().to_pem()
    }

    /// Signs a transfer of `value` to `receiver`.
    ///
    /// The signature covers the hex text of the SHA-256 digest of the message's
    /// canonical form. The nonce advances only once the transaction is built,
    /// and is never rolled back if the ledger later refuses it.
    pub fn sign_transaction(
        &mut self,
        receiver: impl Into<AccountId>,
        value: u64,
        metadata: impl Into<String>,
    ) -> Result<Transaction, AccountError> {
        let message = TransactionMessage {
            sender: self.id.clone(),
            receiver: receiver.into(),
            value,
            metadata: metadata.into(),
            nonce: self.nonce + 1,
        };

        let digest = message.digest_hex()?;
        let signature = self.keys.sign(digest.as_bytes())?;
        let transaction = Transaction::new(message, signature);

        self.nonce = transaction.message().nonce;
        Ok(transaction)
    }

    /// Builds the ledger record for this identity
    pub fn account(&self) -> Account {
        Account::new(self.id.clone(), self.keys.public_key().clone(), self.initial_balance)
    }
}

/// The ledger's view of an account
#[derive(Debug, Clone)]
pub struct Account {
    id: AccountId,
    public_key: PublicKey,
    initial_balance: u64,
    balance: u64,
}

impl Account {
    pub fn new(id: AccountId, public_key: PublicKey, initial_balance: u64) -> Self {
        Account {
            id,
            public_key,
            initial_balance,
            balance: initial_balance,
        }
    }

    pub fn id(&self) -> &AccountId {
        &self.id
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Balance at registration, the seed for chain replay
    pub fn initial_balance(&self) -> u64 {
        self.initial_balance
    }

    pub fn balance(&self) -> u64 {
        self.balance
    }

    /// Increases the account's balance
    pub fn deposit(&mut self, amount: u64) -> Result<(), AccountError> {
        self.balance = self
            .balance
            .checked_add(amount)
            .ok_or(AccountError::BalanceOverflow {
                balance: self.balance,
                amount,
            })?;
        Ok(())
    }

    /// Decreases the account's balance
    pub fn withdraw(&mut self, amount: u64) -> Result<(), AccountError> {
        if self.balance < amount {
            return Err(AccountError::InsufficientFunds {
                required: amount,
                available: self.balance,
            });
        }

        self.balance -= amount;
        Ok(())
    }

    /// Whether the account may send `value`.
    ///
    /// Strict: a transfer of the entire remaining balance is refused.
    pub fn can_send(&self, value: u64) -> bool {
        self.balance > value
    }
}
