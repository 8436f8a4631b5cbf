//! A single-process ledger: RSA-signed account transfers batched into
//! proof-of-work blocks, with full replay certification from genesis.

pub mod blockchain;
