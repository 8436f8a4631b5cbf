use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};
use thiserror::Error;

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::account::{Account, AccountError, AccountId, Identity};
use super::block::{Block, BlockError, HashTarget};
use super::config::LedgerConfig;
use super::encoding::EncodingError;
use super::pow::{CancelToken, MiningLimits};
use super::transaction::{Transaction, TransactionError};

/// Errors that can occur during ledger operations
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Invalid signature on transaction from {sender}")]
    InvalidSignature { sender: AccountId },

    #[error("Unknown sender: {0}")]
    UnknownSender(AccountId),

    #[error("No valid transaction to seal ({rejected} rejected)")]
    NoValidTransactions { rejected: usize },

    #[error("Chain has no genesis block")]
    MissingGenesis,

    #[error("Account error: {0}")]
    AccountError(#[from] AccountError),

    #[error("Transaction error: {0}")]
    TransactionError(#[from] TransactionError),

    #[error("Encoding error: {0}")]
    EncodingError(#[from] EncodingError),

    #[error("Block error: {0}")]
    BlockError(#[from] BlockError),
}

/// Result of checking a transaction's signature against the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureStatus {
    Valid,
    InvalidSignature,
    UnknownSigner,
}

/// Why block processing refused a transaction
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectionReason {
    #[error("Insufficient balance: {balance} available, {value} requested")]
    InsufficientBalance { balance: u64, value: u64 },

    #[error("Unknown sender: {0}")]
    UnknownSender(AccountId),

    #[error("Unknown receiver: {0}")]
    UnknownReceiver(AccountId),

    #[error("Crediting {value} would overflow the balance of {account}")]
    BalanceOverflow { account: AccountId, value: u64 },
}

/// A transaction that failed balance processing, kept for diagnostics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedTransaction {
    pub transaction: Transaction,
    pub reason: RejectionReason,
}

/// What went wrong in the first block that failed certification
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrityFault {
    #[error("previous hash {found} does not match {expected}")]
    BrokenLink { expected: String, found: String },

    #[error("stored hash {stored} does not match recomputed {computed}")]
    HashMismatch { stored: String, computed: String },

    #[error("block could not be re-hashed: {0}")]
    Unhashable(String),

    #[error("block at position {expected} claims index {found}")]
    IndexMismatch { expected: u64, found: u64 },

    #[error("hash does not meet the recorded target")]
    TargetNotMet,

    #[error("{account} would overdraw: balance {balance}, transfer {value}")]
    Overdraft {
        account: AccountId,
        balance: u64,
        value: u64,
    },

    #[error("transfer touches unknown account {0}")]
    UnknownAccount(AccountId),

    #[error("transfer overflows the balance of {0}")]
    BalanceOverflow(AccountId),

    #[error("chain is empty")]
    MissingGenesis,
}

/// Certification stopped at a block that failed one of its checks
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Chain integrity broken at block {index} (valid up to {last_valid_index}): {fault}")]
pub struct IntegrityError {
    pub index: u64,
    pub last_valid_index: u64,
    pub fault: IntegrityFault,
}

/// Replays a chain from genesis against the given starting balances.
///
/// Walks left to right and stops at the first block whose position, link,
/// hash, target or replayed transfers fail. Returns the position of the last
/// block; every reported index is a position in `chain`.
pub fn certify_chain(
    chain: &[Block],
    mut balances: HashMap<AccountId, u64>,
) -> Result<u64, IntegrityError> {
    let Some(genesis) = chain.first() else {
        return Err(IntegrityError {
            index: 0,
            last_valid_index: 0,
            fault: IntegrityFault::MissingGenesis,
        });
    };

    let mut expected_previous_hash = genesis.hash.as_str();
    let mut last_valid_index = 0;

    for (position, block) in chain.iter().enumerate().skip(1) {
        let position = position as u64;
        let broken = |fault| IntegrityError {
            index: position,
            last_valid_index,
            fault,
        };

        if block.index != position {
            return Err(broken(IntegrityFault::IndexMismatch {
                expected: position,
                found: block.index,
            }));
        }

        if block.previous_hash != expected_previous_hash {
            return Err(broken(IntegrityFault::BrokenLink {
                expected: expected_previous_hash.to_string(),
                found: block.previous_hash.clone(),
            }));
        }

        match block.recompute_hash() {
            Ok(computed) if computed == block.hash => {}
            Ok(computed) => {
                return Err(broken(IntegrityFault::HashMismatch {
                    stored: block.hash.clone(),
                    computed,
                }))
            }
            Err(err) => return Err(broken(IntegrityFault::Unhashable(err.to_string()))),
        }

        if !block.meets_target() {
            return Err(broken(IntegrityFault::TargetNotMet));
        }

        replay_transfers(&block.transactions, &mut balances).map_err(broken)?;

        debug!("Certified block {}: {}", block.index, block.hash);
        expected_previous_hash = &block.hash;
        last_valid_index = position;
    }

    Ok(last_valid_index)
}

fn replay_transfers(
    transactions: &[Transaction],
    balances: &mut HashMap<AccountId, u64>,
) -> Result<(), IntegrityFault> {
    for transaction in transactions {
        let value = transaction.value();

        let sender = balances
            .get_mut(transaction.sender())
            .ok_or_else(|| IntegrityFault::UnknownAccount(transaction.sender().clone()))?;
        if *sender < value {
            return Err(IntegrityFault::Overdraft {
                account: transaction.sender().clone(),
                balance: *sender,
                value,
            });
        }
        *sender -= value;

        let receiver = balances
            .get_mut(transaction.receiver())
            .ok_or_else(|| IntegrityFault::UnknownAccount(transaction.receiver().clone()))?;
        *receiver = receiver
            .checked_add(value)
            .ok_or_else(|| IntegrityFault::BalanceOverflow(transaction.receiver().clone()))?;
    }

    Ok(())
}

/// The ledger: chain, pending queue, rejected record and account registry.
///
/// Clones share state. Admission may run concurrently with everything else;
/// sealing and account registration are serialized.
#[derive(Debug, Clone)]
pub struct Ledger {
    /// The chain of blocks, genesis first
    chain: Arc<RwLock<Vec<Block>>>,

    /// Admitted transactions awaiting the next block
    pending_transactions: Arc<Mutex<VecDeque<Transaction>>>,

    /// Transactions refused during processing
    rejected_transactions: Arc<Mutex<Vec<RejectedTransaction>>>,

    /// Registered accounts
    accounts: Arc<RwLock<HashMap<AccountId, Account>>>,

    /// Difficulty applied to the next sealed block
    hash_target: Arc<RwLock<HashTarget>>,

    /// Highest index confirmed by the last certification
    last_valid_index: Arc<AtomicU64>,

    /// Held for the whole of a seal, and while registering accounts
    sealing: Arc<Mutex<()>>,

    config: Arc<LedgerConfig>,
}

impl Ledger {
    /// Creates a ledger holding only the genesis block
    pub fn new(hash_target: HashTarget) -> Result<Self, LedgerError> {
        Self::with_config(LedgerConfig {
            hash_target,
            ..LedgerConfig::default()
        })
    }

    pub fn with_config(config: LedgerConfig) -> Result<Self, LedgerError> {
        let genesis = Block::genesis()?;
        info!("Created genesis block {}", genesis.hash);

        Ok(Ledger {
            chain: Arc::new(RwLock::new(vec![genesis])),
            pending_transactions: Arc::new(Mutex::new(VecDeque::new())),
            rejected_transactions: Arc::new(Mutex::new(Vec::new())),
            accounts: Arc::new(RwLock::new(HashMap::new())),
            hash_target: Arc::new(RwLock::new(config.hash_target.clone())),
            last_valid_index: Arc::new(AtomicU64::new(0)),
            sealing: Arc::new(Mutex::new(())),
            config: Arc::new(config),
        })
    }

    /// Registers an account. An existing account with the same id is replaced.
    pub fn add_account(&self, account: Account) {
        let _sealing = self.sealing.lock();
        let mut accounts = self.accounts.write();

        if accounts.contains_key(account.id()) {
            warn!("Replacing existing account {}", account.id());
        }
        info!("Registered account {} with balance {}", account.id(), account.balance());
        accounts.insert(account.id().clone(), account);
    }

    /// Creates an identity using the configured key size and registers it.
    ///
    /// Without an explicit balance the configured default is used.
    pub fn open_account(
        &self,
        id: impl Into<AccountId>,
        initial_balance: Option<u64>,
    ) -> Result<Identity, LedgerError> {
        let balance = initial_balance.unwrap_or(self.config.default_balance);
        let identity = Identity::with_key_bits(id, balance, self.config.key_bits)?;

        self.add_account(identity.account());
        Ok(identity)
    }

    /// Checks a transaction's signature against the sender's registered key
    pub fn verify_transaction(&self, transaction: &Transaction) -> Result<SignatureStatus, LedgerError> {
        let accounts = self.accounts.read();
        let Some(sender) = accounts.get(transaction.sender()) else {
            return Ok(SignatureStatus::UnknownSigner);
        };

        match transaction.verify_signature(sender.public_key()) {
            Ok(true) => Ok(SignatureStatus::Valid),
            Ok(false) | Err(TransactionError::CryptoError(_)) => Ok(SignatureStatus::InvalidSignature),
            Err(err) => Err(err.into()),
        }
    }

    /// Verifies a transaction and queues it for the next block.
    ///
    /// Refused transactions are discarded, never queued for retry. The nonce is
    /// not checked.
    pub fn admit(&self, transaction: Transaction) -> Result<(), LedgerError> {
        match self.verify_transaction(&transaction)? {
            SignatureStatus::Valid => {
                debug!(
                    "Admitted transaction {} -> {} ({})",
                    transaction.sender(),
                    transaction.receiver(),
                    transaction.value()
                );
                self.pending_transactions.lock().push_back(transaction);
                Ok(())
            }
            SignatureStatus::InvalidSignature => {
                error!("Transaction from {} failed signature validation", transaction.sender());
                Err(LedgerError::InvalidSignature {
                    sender: transaction.sender().clone(),
                })
            }
            SignatureStatus::UnknownSigner => {
                error!("Transaction from unknown sender {}", transaction.sender());
                Err(LedgerError::UnknownSender(transaction.sender().clone()))
            }
        }
    }

    /// Processes the pending queue and mines a block from what survives
    pub fn seal_block(&self) -> Result<Block, LedgerError> {
        self.seal_block_with(&CancelToken::new())
    }

    /// Like [`Ledger::seal_block`], with a token that can abort the search.
    ///
    /// Transfers are staged against copies of the touched accounts and only
    /// committed once the block is mined. If mining fails, balances are left
    /// untouched and the accepted transactions go back to the front of the
    /// queue; rejected ones stay rejected.
    pub fn seal_block_with(&self, cancel: &CancelToken) -> Result<Block, LedgerError> {
        let _sealing = self.sealing.lock();

        let queued: Vec<Transaction> = self.pending_transactions.lock().drain(..).collect();
        let (accepted, staged, rejected) = self.process_transactions(queued);

        if accepted.is_empty() {
            warn!("No valid transaction exists to create a block");
            return Err(LedgerError::NoValidTransactions { rejected });
        }

        let (index, previous_hash) = {
            let chain = self.chain.read();
            let tip = chain.last().ok_or(LedgerError::MissingGenesis)?;
            (chain.len() as u64, tip.hash.clone())
        };
        let hash_target = self.hash_target();

        let block = match Block::seal(
            index,
            accepted.clone(),
            previous_hash,
            &hash_target,
            &self.mining_limits(),
            cancel,
        ) {
            Ok(block) => block,
            Err(err) => {
                warn!("Mining block {} failed, requeueing {} transactions: {}", index, accepted.len(), err);
                let mut pending = self.pending_transactions.lock();
                for transaction in accepted.into_iter().rev() {
                    pending.push_front(transaction);
                }
                return Err(err.into());
            }
        };

        let mut accounts = self.accounts.write();
        for (id, account) in staged {
            accounts.insert(id, account);
        }
        self.chain.write().push(block.clone());

        info!(
            "Appended block {} with {} transactions ({} rejected)",
            block.index,
            block.transactions.len(),
            rejected
        );
        Ok(block)
    }

    /// Applies the strict balance rule to each transaction in arrival order.
    ///
    /// Returns the accepted transactions, the staged account records they
    /// touched, and how many were rejected.
    fn process_transactions(
        &self,
        queued: Vec<Transaction>,
    ) -> (Vec<Transaction>, HashMap<AccountId, Account>, usize) {
        let accounts = self.accounts.read();
        let mut staged: HashMap<AccountId, Account> = HashMap::new();
        let mut accepted = Vec::new();
        let mut rejected = Vec::new();

        for transaction in queued {
            match stage_transfer(&accounts, &mut staged, &transaction) {
                Ok(()) => {
                    debug!(
                        "Transferred {} from {} to {}",
                        transaction.value(),
                        transaction.sender(),
                        transaction.receiver()
                    );
                    accepted.push(transaction);
                }
                Err(reason) => {
                    warn!(
                        "Rejected transfer of {} from {} to {}: {}",
                        transaction.value(),
                        transaction.sender(),
                        transaction.receiver(),
                        reason
                    );
                    rejected.push(RejectedTransaction { transaction, reason });
                }
            }
        }

        let rejected_count = rejected.len();
        self.rejected_transactions.lock().extend(rejected);
        (accepted, staged, rejected_count)
    }

    /// Re-derives the whole chain from genesis and initial balances.
    ///
    /// Records the index of the last block that passed; never mutates the chain.
    pub fn certify(&self) -> Result<u64, IntegrityError> {
        let chain = self.chain();
        let result = certify_chain(&chain, self.initial_balances());

        match &result {
            Ok(height) => {
                self.last_valid_index.store(*height, Ordering::SeqCst);
                info!("All blocks are valid, current block height is {}", height);
            }
            Err(err) => {
                self.last_valid_index.store(err.last_valid_index, Ordering::SeqCst);
                error!("Block validation failed: {}", err);
            }
        }

        result
    }

    /// Appends a block as-is, without processing or validation.
    ///
    /// Balances are not touched; only [`Ledger::certify`] will judge it.
    pub fn import_block(&self, block: Block) {
        let _sealing = self.sealing.lock();
        warn!("Importing unverified block {}", block.index);
        self.chain.write().push(block);
    }

    /// Snapshot of the chain
    pub fn chain(&self) -> Vec<Block> {
        self.chain.read().clone()
    }

    /// Position of the last block (0 when only genesis exists)
    pub fn height(&self) -> u64 {
        self.chain.read().len().saturating_sub(1) as u64
    }

    pub fn last_block(&self) -> Option<Block> {
        self.chain.read().last().cloned()
    }

    pub fn pending_transactions(&self) -> Vec<Transaction> {
        self.pending_transactions.lock().iter().cloned().collect()
    }

    pub fn rejected_transactions(&self) -> Vec<RejectedTransaction> {
        self.rejected_transactions.lock().clone()
    }

    pub fn account(&self, id: &str) -> Option<Account> {
        self.accounts.read().get(id).cloned()
    }

    pub fn balance(&self, id: &str) -> Option<u64> {
        self.accounts.read().get(id).map(Account::balance)
    }

    /// Current balances, ordered by account id
    pub fn balances(&self) -> Vec<(AccountId, u64)> {
        let mut balances: Vec<_> = self
            .accounts
            .read()
            .values()
            .map(|account| (account.id().clone(), account.balance()))
            .collect();
        balances.sort();
        balances
    }

    /// Balances at registration, the seed for certification
    pub fn initial_balances(&self) -> HashMap<AccountId, u64> {
        self.accounts
            .read()
            .values()
            .map(|account| (account.id().clone(), account.initial_balance()))
            .collect()
    }

    pub fn hash_target(&self) -> HashTarget {
        self.hash_target.read().clone()
    }

    /// Changes the difficulty for blocks sealed from now on
    pub fn set_hash_target(&self, hash_target: HashTarget) {
        info!("Hash target changed to {}", hash_target);
        *self.hash_target.write() = hash_target;
    }

    pub fn last_valid_index(&self) -> u64 {
        self.last_valid_index.load(Ordering::SeqCst)
    }

    pub fn mining_limits(&self) -> MiningLimits {
        self.config.mining.limits()
    }
}

/// Checks and applies one transfer against the staged account copies.
///
/// Staged records are only replaced once the whole transfer has succeeded.
fn stage_transfer(
    accounts: &HashMap<AccountId, Account>,
    staged: &mut HashMap<AccountId, Account>,
    transaction: &Transaction,
) -> Result<(), RejectionReason> {
    let sender_id = transaction.sender();
    let receiver_id = transaction.receiver();
    let value = transaction.value();

    let current = |id: &AccountId| staged.get(id).or_else(|| accounts.get(id)).cloned();
    let mut sender = current(sender_id)
        .ok_or_else(|| RejectionReason::UnknownSender(sender_id.clone()))?;
    let receiver = current(receiver_id)
        .ok_or_else(|| RejectionReason::UnknownReceiver(receiver_id.clone()))?;

    if !sender.can_send(value) {
        return Err(RejectionReason::InsufficientBalance {
            balance: sender.balance(),
            value,
        });
    }

    let overflow = |_| RejectionReason::BalanceOverflow {
        account: receiver_id.clone(),
        value,
    };

    sender
        .withdraw(value)
        .map_err(|_| RejectionReason::InsufficientBalance {
            balance: sender.balance(),
            value,
        })?;

    if sender_id == receiver_id {
        sender.deposit(value).map_err(overflow)?;
        staged.insert(sender_id.clone(), sender);
    } else {
        let mut receiver = receiver;
        receiver.deposit(value).map_err(overflow)?;
        staged.insert(sender_id.clone(), sender);
        staged.insert(receiver_id.clone(), receiver);
    }

    Ok(())
}

impl fmt::Display for Ledger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let chain = self.chain.read();
        writeln!(f, "Chain: {} blocks", chain.len())?;
        for block in chain.iter() {
            writeln!(
                f,
                "  #{} {} ({} transactions, previous {})",
                block.index,
                block.hash,
                block.transactions.len(),
                block.previous_hash
            )?;
        }
        write!(f, "Pending transactions: {}", self.pending_transactions.lock().len())
    }
}
