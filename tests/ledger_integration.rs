use sim_ledger::blockchain::chain::{IntegrityFault, RejectionReason};
use sim_ledger::blockchain::{
    certify_chain, Block, CancelToken, HashTarget, Identity, Ledger, LedgerConfig, LedgerError,
    MiningLimits, SignatureStatus, Transaction,
};

fn easy_target() -> HashTarget {
    format!("0{}", "f".repeat(63)).parse().unwrap()
}

fn test_ledger() -> Ledger {
    let config = LedgerConfig {
        hash_target: easy_target(),
        key_bits: 1024,
        ..LedgerConfig::default()
    };
    Ledger::with_config(config).unwrap()
}

fn send(ledger: &Ledger, from: &mut Identity, to: &str, value: u64) -> Result<(), LedgerError> {
    let transaction = from.sign_transaction(to, value, "").unwrap();
    ledger.admit(transaction)
}

fn total_balance(ledger: &Ledger) -> u64 {
    ledger.balances().iter().map(|(_, balance)| balance).sum()
}

#[test]
fn overdraft_is_admitted_but_never_sealed() {
    let ledger = test_ledger();
    let mut alice = ledger.open_account("alice", Some(10)).unwrap();
    ledger.open_account("bob", Some(0)).unwrap();

    // Signature is valid, so admission succeeds
    send(&ledger, &mut alice, "bob", 20).unwrap();

    let result = ledger.seal_block();
    assert!(matches!(result, Err(LedgerError::NoValidTransactions { rejected: 1 })));
    assert_eq!(ledger.chain().len(), 1);
    assert_eq!(ledger.balance("alice"), Some(10));
    assert_eq!(ledger.balance("bob"), Some(0));
    assert!(ledger.pending_transactions().is_empty());

    let rejected = ledger.rejected_transactions();
    assert_eq!(rejected.len(), 1);
    assert_eq!(
        rejected[0].reason,
        RejectionReason::InsufficientBalance { balance: 10, value: 20 }
    );

    // A transfer within the balance goes through
    send(&ledger, &mut alice, "bob", 5).unwrap();
    let block = ledger.seal_block().unwrap();

    assert_eq!(block.index, 1);
    assert_eq!(ledger.chain().len(), 2);
    assert_eq!(ledger.balance("alice"), Some(5));
    assert_eq!(ledger.balance("bob"), Some(5));
}

#[test]
fn transfer_of_entire_balance_is_rejected() {
    let ledger = test_ledger();
    let mut alice = ledger.open_account("alice", Some(10)).unwrap();
    ledger.open_account("bob", Some(0)).unwrap();

    send(&ledger, &mut alice, "bob", 10).unwrap();
    assert!(ledger.seal_block().is_err());
    assert_eq!(ledger.balance("alice"), Some(10));

    send(&ledger, &mut alice, "bob", 9).unwrap();
    ledger.seal_block().unwrap();
    assert_eq!(ledger.balance("alice"), Some(1));
    assert_eq!(ledger.balance("bob"), Some(9));
}

#[test]
fn balances_are_conserved_across_blocks() {
    let ledger = test_ledger();
    let mut alice = ledger.open_account("alice", Some(10)).unwrap();
    let mut bob = ledger.open_account("bob", Some(0)).unwrap();
    let mut carol = ledger.open_account("carol", None).unwrap();
    let initial_total = total_balance(&ledger);

    send(&ledger, &mut alice, "bob", 20).unwrap();
    send(&ledger, &mut bob, "carol", 30).unwrap();
    send(&ledger, &mut carol, "alice", 50).unwrap();
    ledger.seal_block().unwrap();
    assert_eq!(total_balance(&ledger), initial_total);

    send(&ledger, &mut alice, "bob", 45).unwrap();
    send(&ledger, &mut bob, "carol", 40).unwrap();
    send(&ledger, &mut carol, "bob", 1).unwrap();
    ledger.seal_block().unwrap();
    assert_eq!(total_balance(&ledger), initial_total);

    assert_eq!(ledger.balance("alice"), Some(15));
    assert_eq!(ledger.balance("bob"), Some(6));
    assert_eq!(ledger.balance("carol"), Some(89));
    assert_eq!(ledger.certify(), Ok(2));
}

#[test]
fn tampered_message_is_refused_at_admission() {
    let ledger = test_ledger();
    let mut alice = ledger.open_account("alice", Some(10)).unwrap();
    ledger.open_account("bob", Some(0)).unwrap();

    let transaction = alice.sign_transaction("bob", 5, "").unwrap();
    let mut message = transaction.message().clone();
    message.value = 9;
    let forged = Transaction::new(message, transaction.signature().clone());

    assert_eq!(
        ledger.verify_transaction(&forged).unwrap(),
        SignatureStatus::InvalidSignature
    );
    assert!(matches!(
        ledger.admit(forged),
        Err(LedgerError::InvalidSignature { .. })
    ));
    assert!(ledger.pending_transactions().is_empty());

    // Nonce advanced anyway
    assert_eq!(alice.nonce(), 1);
}

#[test]
fn envelope_from_the_wire_verifies() {
    let ledger = test_ledger();
    let mut alice = ledger.open_account("alice", Some(10)).unwrap();
    ledger.open_account("bob", Some(0)).unwrap();

    let transaction = alice.sign_transaction("bob", 5, "café").unwrap();
    let wire = serde_json::to_string(&transaction).unwrap();
    let received: Transaction = serde_json::from_str(&wire).unwrap();

    assert_eq!(ledger.verify_transaction(&received).unwrap(), SignatureStatus::Valid);

    let tampered_wire = wire.replace("\"value\":5", "\"value\":6");
    assert_ne!(tampered_wire, wire);
    let tampered: Transaction = serde_json::from_str(&tampered_wire).unwrap();
    assert_eq!(
        ledger.verify_transaction(&tampered).unwrap(),
        SignatureStatus::InvalidSignature
    );
}

#[test]
fn sealed_blocks_satisfy_their_targets() {
    let ledger = test_ledger();
    let mut alice = ledger.open_account("alice", Some(100)).unwrap();
    ledger.open_account("bob", Some(0)).unwrap();

    let targets = [
        easy_target(),
        format!("00{}", "f".repeat(62)).parse().unwrap(),
        "f".repeat(64).parse().unwrap(),
    ];
    for target in &targets {
        ledger.set_hash_target(target.clone());
        send(&ledger, &mut alice, "bob", 1).unwrap();
        ledger.seal_block().unwrap();
    }

    let chain = ledger.chain();
    for (block, target) in chain[1..].iter().zip(&targets) {
        assert_eq!(block.recompute_hash().unwrap(), block.hash);
        assert_eq!(block.hash_target.as_ref(), Some(target));
        assert!(block.hash.as_str() < target.as_str());
    }
    assert_eq!(ledger.certify(), Ok(3));
}

#[test]
fn broken_link_stops_certification() {
    let ledger = test_ledger();
    let mut alice = ledger.open_account("alice", Some(50)).unwrap();
    ledger.open_account("bob", Some(0)).unwrap();

    send(&ledger, &mut alice, "bob", 10).unwrap();
    ledger.seal_block().unwrap();
    send(&ledger, &mut alice, "bob", 10).unwrap();
    ledger.seal_block().unwrap();

    let mut chain = ledger.chain();
    assert_eq!(chain.len(), 3);
    assert_eq!(certify_chain(&chain, ledger.initial_balances()), Ok(2));

    chain[2].previous_hash = "deadbeef".to_string();
    let err = certify_chain(&chain, ledger.initial_balances()).unwrap_err();

    assert_eq!(err.index, 2);
    assert_eq!(err.last_valid_index, 1);
    assert!(matches!(err.fault, IntegrityFault::BrokenLink { .. }));
}

#[test]
fn forged_block_is_caught_by_replay() {
    let ledger = test_ledger();
    let mut alice = ledger.open_account("alice", Some(10)).unwrap();
    let mut bob = ledger.open_account("bob", Some(0)).unwrap();

    send(&ledger, &mut alice, "bob", 5).unwrap();
    ledger.seal_block().unwrap();

    // Properly mined and linked, but bob never had 100
    let forged = bob.sign_transaction("alice", 100, "").unwrap();
    let tip = ledger.last_block().unwrap();
    let block = Block::seal(
        ledger.height() + 1,
        vec![forged],
        tip.hash,
        &ledger.hash_target(),
        &MiningLimits::unbounded(),
        &CancelToken::new(),
    )
    .unwrap();
    ledger.import_block(block);

    send(&ledger, &mut alice, "bob", 1).unwrap();
    ledger.seal_block().unwrap();
    assert_eq!(ledger.height(), 3);

    let err = ledger.certify().unwrap_err();
    assert_eq!(err.index, 2);
    assert_eq!(
        err.fault,
        IntegrityFault::Overdraft {
            account: "bob".into(),
            balance: 5,
            value: 100,
        }
    );
    assert_eq!(ledger.last_valid_index(), 1);
}

#[test]
fn genesis_alone_certifies() {
    let ledger = test_ledger();
    let genesis = &ledger.chain()[0];

    assert!(genesis.transactions.is_empty());
    assert!(genesis.hash_target.is_none());
    assert!(!genesis.meets_target());
    assert_eq!(ledger.certify(), Ok(0));
    assert_eq!(ledger.last_valid_index(), 0);
}

#[test]
fn concurrent_admission_from_cloned_handles() {
    let ledger = test_ledger();
    let mut senders: Vec<Identity> = ["a", "b", "c", "d"]
        .iter()
        .map(|id| ledger.open_account(*id, Some(100)).unwrap())
        .collect();
    ledger.open_account("sink", Some(0)).unwrap();

    let transactions: Vec<Vec<Transaction>> = senders
        .iter_mut()
        .map(|identity| {
            (0..5)
                .map(|_| identity.sign_transaction("sink", 1, "").unwrap())
                .collect()
        })
        .collect();

    let handles: Vec<_> = transactions
        .into_iter()
        .map(|batch| {
            let ledger = ledger.clone();
            std::thread::spawn(move || {
                for transaction in batch {
                    ledger.admit(transaction).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(ledger.pending_transactions().len(), 20);
    let block = ledger.seal_block().unwrap();
    assert_eq!(block.transactions.len(), 20);
    assert_eq!(ledger.balance("sink"), Some(20));
    assert_eq!(ledger.certify(), Ok(1));
}
