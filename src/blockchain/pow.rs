//! Bounded, cancellable proof-of-work search.

use log::debug;
use thiserror::Error;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How often (in attempts) progress is logged
const CHECK_INTERVAL: u64 = 4096;

/// Errors that end a proof-of-work search without a result
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MiningError {
    #[error("Mining timed out after {attempts} attempts")]
    Timeout { attempts: u64 },

    #[error("Mining cancelled after {attempts} attempts")]
    Cancelled { attempts: u64 },
}

/// Upper bounds on a single search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MiningLimits {
    /// Maximum number of candidate hashes to try
    pub max_attempts: Option<u64>,

    /// Wall-clock budget for the whole search
    pub max_duration: Option<Duration>,
}

impl MiningLimits {
    /// No bound at all
    pub fn unbounded() -> Self {
        MiningLimits::default()
    }

    pub fn with_max_attempts(max_attempts: u64) -> Self {
        MiningLimits {
            max_attempts: Some(max_attempts),
            max_duration: None,
        }
    }
}

/// Shared flag for cooperative cancellation of a running search
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Outcome of a successful search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Solution {
    pub nonce: u64,
    pub hash: String,
    pub attempts: u64,
}

/// Tries nonces 1, 2, 3, ... until `accept` approves the hash `hasher` yields.
///
/// Hasher errors abort the search immediately; running out of budget or being
/// cancelled surfaces as a [`MiningError`] converted into the caller's type.
pub fn search<H, A, E>(
    limits: &MiningLimits,
    cancel: &CancelToken,
    mut hasher: H,
    accept: A,
) -> Result<Solution, E>
where
    H: FnMut(u64) -> Result<String, E>,
    A: Fn(&str) -> bool,
    E: From<MiningError>,
{
    let started = Instant::now();
    let mut attempts = 0u64;

    loop {
        if cancel.is_cancelled() {
            return Err(MiningError::Cancelled { attempts }.into());
        }
        if limits.max_attempts.is_some_and(|max| attempts >= max) {
            return Err(MiningError::Timeout { attempts }.into());
        }
        if limits.max_duration.is_some_and(|max| started.elapsed() >= max) {
            return Err(MiningError::Timeout { attempts }.into());
        }
        if attempts % CHECK_INTERVAL == 0 && attempts > 0 {
            debug!("Mining: {} attempts so far", attempts);
        }

        attempts += 1;
        let hash = hasher(attempts)?;

        if accept(&hash) {
            return Ok(Solution {
                nonce: attempts,
                hash,
                attempts,
            });
        }
    }
}
