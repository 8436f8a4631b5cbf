use anyhow::{Context, Result};
use log::{info, warn};

use sim_ledger::blockchain::{Block, CancelToken, Identity, Ledger, LedgerConfig};

// Load configuration from the file named by SIM_LEDGER_CONFIG, or use defaults
fn load_config() -> Result<LedgerConfig> {
    match std::env::var("SIM_LEDGER_CONFIG") {
        Ok(path) => {
            info!("Loading configuration from {}", path);
            LedgerConfig::load(&path).with_context(|| format!("failed to load {}", path))
        }
        Err(_) => Ok(LedgerConfig::default()),
    }
}

// Submit a transfer, logging refusals instead of aborting the demo
fn submit(ledger: &Ledger, from: &mut Identity, to: &str, value: u64, metadata: &str) -> Result<()> {
    let transaction = from.sign_transaction(to, value, metadata)?;
    if let Err(err) = ledger.admit(transaction) {
        warn!("Transaction refused: {}", err);
    }
    Ok(())
}

fn seal(ledger: &Ledger) {
    match ledger.seal_block() {
        Ok(block) => info!("Block {} sealed with hash {}", block.index, block.hash),
        Err(err) => warn!("No block produced: {}", err),
    }
}

fn main() -> Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = load_config()?;
    let ledger = Ledger::with_config(config)?;

    let mut alice = ledger.open_account("alice", Some(10))?;
    let mut bob = ledger.open_account("bob", Some(0))?;
    let mut carol = ledger.open_account("carol", None)?;
    let mut dave = ledger.open_account("dave", None)?;

    submit(&ledger, &mut alice, "bob", 20, "test")?;
    submit(&ledger, &mut bob, "carol", 30, "")?;
    submit(&ledger, &mut carol, "alice", 50, "team fund")?;
    seal(&ledger);

    // A block forged straight from a signed transaction, skipping balance checks
    let forged = bob.sign_transaction("alice", 100, "")?;
    let tip = ledger.last_block().context("chain has no genesis block")?;
    let forged_block = Block::seal(
        ledger.height() + 1,
        vec![forged],
        tip.hash,
        &ledger.hash_target(),
        &ledger.mining_limits(),
        &CancelToken::new(),
    )?;
    ledger.import_block(forged_block);

    submit(&ledger, &mut alice, "dave", 20, "")?;
    submit(&ledger, &mut dave, "carol", 35, "")?;
    submit(&ledger, &mut bob, "alice", 100, "")?;
    seal(&ledger);

    submit(&ledger, &mut alice, "bob", 65, "test")?;
    submit(&ledger, &mut bob, "carol", 30, "")?;
    submit(&ledger, &mut carol, "alice", 86, "team fund")?;
    seal(&ledger);

    println!("{}", ledger);
    for (id, balance) in ledger.balances() {
        println!("{}: {}", id, balance);
    }

    match ledger.certify() {
        Ok(height) => println!("Validation successful, height {}", height),
        Err(err) => println!("Validation failed: {}", err),
    }

    Ok(())
}
