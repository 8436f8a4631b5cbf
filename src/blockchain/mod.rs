// Blockchain module
//
// This module contains the ledger implementation including:
// - Identities, accounts and RSA-PSS signing
// - Canonical encoding used for hashing and signatures
// - Signed transaction envelopes
// - Blocks and the bounded proof-of-work search
// - The ledger: admission, sealing and certification

pub mod account;
pub mod block;
pub mod chain;
pub mod config;
pub mod crypto;
pub mod encoding;
pub mod pow;
pub mod transaction;

// Re-export main components for easier access
pub use account::{Account, AccountId, Identity};
pub use block::{Block, HashTarget};
pub use chain::{certify_chain, IntegrityError, Ledger, LedgerError, SignatureStatus};
pub use config::LedgerConfig;
pub use pow::{CancelToken, MiningError, MiningLimits};
pub use transaction::{Transaction, TransactionMessage};
