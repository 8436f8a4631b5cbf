use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use std::fmt;
use std::str::FromStr;

use super::encoding::{canonical_digest, to_canonical_string, EncodingError};
use super::pow::{self, CancelToken, MiningError, MiningLimits};
use super::transaction::Transaction;

/// Width of a hex SHA-256 digest
pub const HASH_HEX_LEN: usize = 64;

/// Difficulty used when none is configured: three leading zero nibbles
pub const DEFAULT_HASH_TARGET: &str =
    "000fffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff";

/// Arbitrary `previous_hash` of the genesis block
pub const GENESIS_PREVIOUS_HASH: &str =
    "The Times 03/Jan/2009 Chancellor on brink of second bailout for banks";

/// Fixed payload carried by the genesis block
pub const GENESIS_PAYLOAD: &str = "Genesis block using same string as bitcoin!";

/// Errors that can occur during block operations
#[derive(Debug, Error)]
pub enum BlockError {
    #[error("Invalid hash target {0:?}: expected 64 hex characters")]
    InvalidHashTarget(String),

    #[error("Encoding error: {0}")]
    EncodingError(#[from] EncodingError),

    #[error("Mining error: {0}")]
    MiningError(#[from] MiningError),
}

/// Difficulty threshold: a 64-character lowercase hex string.
///
/// Hashes and targets share a fixed width, so plain string comparison orders
/// them numerically. Smaller targets are harder.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HashTarget(String);

impl HashTarget {
    /// Whether a hex digest lies strictly below this target
    pub fn is_met_by(&self, hash: &str) -> bool {
        hash.len() == HASH_HEX_LEN && hash < self.0.as_str()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for HashTarget {
    fn default() -> Self {
        HashTarget(DEFAULT_HASH_TARGET.to_string())
    }
}

impl FromStr for HashTarget {
    type Err = BlockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != HASH_HEX_LEN || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(BlockError::InvalidHashTarget(s.to_string()));
        }

        Ok(HashTarget(s.to_ascii_lowercase()))
    }
}

impl TryFrom<String> for HashTarget {
    type Error = BlockError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<HashTarget> for String {
    fn from(target: HashTarget) -> Self {
        target.0
    }
}

impl fmt::Display for HashTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fields covered by the block hash.
///
/// The hash target is not among them: certification trusts the target a
/// block records, so an imported block can declare an easy one.
#[derive(Clone, Copy, Serialize)]
struct BlockHeader<'a> {
    index: u64,
    timestamp: &'a DateTime<Utc>,
    transactions: &'a [Transaction],
    previous_hash: &'a str,
    nonce: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<&'a str>,
}

impl BlockHeader<'_> {
    fn hash(&self) -> Result<String, EncodingError> {
        canonical_digest(self)
    }
}

/// A header's canonical form split around the nonce digits.
///
/// Keys are sorted, so the encoding always opens with `index` then `nonce`;
/// a search only has to hash the new digits between two fixed halves.
struct HeaderTemplate {
    prefix: String,
    suffix: String,
}

impl HeaderTemplate {
    /// Returns `None` if the encoding does not open with the expected keys
    fn new(header: &BlockHeader<'_>) -> Result<Option<Self>, EncodingError> {
        let canonical = to_canonical_string(&BlockHeader { nonce: 0, ..*header })?;
        let prefix = format!("{{\"index\": {}, \"nonce\": ", header.index);

        let suffix = canonical
            .strip_prefix(prefix.as_str())
            .and_then(|rest| rest.strip_prefix('0'))
            .map(str::to_string);

        Ok(suffix.map(|suffix| HeaderTemplate { prefix, suffix }))
    }

    fn hash(&self, nonce: u64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.prefix.as_bytes());
        hasher.update(nonce.to_string().as_bytes());
        hasher.update(self.suffix.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Represents a block in the blockchain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Index of the block in the chain
    pub index: u64,

    /// Timestamp when sealing started
    pub timestamp: DateTime<Utc>,

    /// Accepted transactions, in processing order
    pub transactions: Vec<Transaction>,

    /// Proof of work counter
    pub nonce: u64,

    /// Hash of the previous block
    pub previous_hash: String,

    /// Difficulty active when the block was sealed (none for genesis)
    pub hash_target: Option<HashTarget>,

    /// Genesis payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,

    /// Accepted hash
    pub hash: String,
}

impl Block {
    /// Creates the genesis block: no transactions, no search, no target
    pub fn genesis() -> Result<Self, BlockError> {
        let mut block = Block {
            index: 0,
            timestamp: Utc::now(),
            transactions: Vec::new(),
            nonce: 0,
            previous_hash: GENESIS_PREVIOUS_HASH.to_string(),
            hash_target: None,
            payload: Some(GENESIS_PAYLOAD.to_string()),
            hash: String::new(),
        };

        block.hash = block.recompute_hash()?;
        Ok(block)
    }

    /// Mines a block whose hash lies below `hash_target`
    ///
    /// # Arguments
    ///
    /// * `index` - The index of the new block
    /// * `transactions` - Already processed transactions to include
    /// * `previous_hash` - The hash of the previous block
    /// * `hash_target` - The difficulty to meet
    /// * `limits` / `cancel` - Bounds on the search
    pub fn seal(
        index: u64,
        transactions: Vec<Transaction>,
        previous_hash: String,
        hash_target: &HashTarget,
        limits: &MiningLimits,
        cancel: &CancelToken,
    ) -> Result<Self, BlockError> {
        let timestamp = Utc::now();
        let header = BlockHeader {
            index,
            timestamp: &timestamp,
            transactions: &transactions,
            previous_hash: &previous_hash,
            nonce: 0,
            payload: None,
        };
        let template = HeaderTemplate::new(&header)?;

        let solution = pow::search(
            limits,
            cancel,
            |nonce| match &template {
                Some(template) => Ok(template.hash(nonce)),
                None => BlockHeader { nonce, ..header }.hash().map_err(BlockError::from),
            },
            |hash| hash_target.is_met_by(hash),
        )?;

        info!(
            "Sealed block {} after {} attempts: {}",
            index, solution.attempts, solution.hash
        );

        Ok(Block {
            index,
            timestamp,
            transactions,
            nonce: solution.nonce,
            previous_hash,
            hash_target: Some(hash_target.clone()),
            payload: None,
            hash: solution.hash,
        })
    }

    /// Re-derives the hash from the stored fields without searching
    pub fn recompute_hash(&self) -> Result<String, EncodingError> {
        BlockHeader {
            index: self.index,
            timestamp: &self.timestamp,
            transactions: &self.transactions,
            previous_hash: &self.previous_hash,
            nonce: self.nonce,
            payload: self.payload.as_deref(),
        }
        .hash()
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }

    /// Whether the stored hash satisfies the recorded target
    pub fn meets_target(&self) -> bool {
        match &self.hash_target {
            Some(target) => target.is_met_by(&self.hash),
            None => false,
        }
    }
}
