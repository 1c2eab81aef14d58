//! Concurrent access to shared wallets

mod common;

use common::{total_minor, Harness};
use rust_decimal_macros::dec;
use std::time::Duration;
use wallet_ledger::money::Money;
use wallet_ledger::{LedgerError, OpContext};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_deposits_serialize() {
    let h = Harness::new();
    let wallet = h.wallet().await;
    let n = 50;

    let mut handles = Vec::new();
    for _ in 0..n {
        let engine = h.engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .deposit(&OpContext::background(), wallet.id, dec!(1.00), "tip")
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(h.balance(wallet.id).await, Money::from_minor(100 * n));

    // Each deposit observed the previous one's result
    let mut afters: Vec<i64> = h
        .store
        .all_records()
        .iter()
        .map(|r| {
            assert_eq!(r.balance_after.minor() - r.balance_before.minor(), 100);
            r.balance_after.minor()
        })
        .collect();
    afters.sort_unstable();
    let expected: Vec<i64> = (1..=n).map(|i| i * 100).collect();
    assert_eq!(afters, expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_opposite_transfers_do_not_deadlock() {
    let h = Harness::new();
    let a = h.funded_wallet(dec!(1000)).await;
    let b = h.funded_wallet(dec!(1000)).await;
    let total_before = total_minor(&h.store);

    let mut handles = Vec::new();
    for i in 0..100 {
        let engine = h.engine.clone();
        let (from, to) = if i % 2 == 0 { (a.id, b.id) } else { (b.id, a.id) };
        handles.push(tokio::spawn(async move {
            engine
                .transfer(&OpContext::background(), from, to, dec!(1.00), "")
                .await
        }));
    }

    let all = async {
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
    };
    tokio::time::timeout(Duration::from_secs(10), all)
        .await
        .expect("opposite-direction transfers deadlocked");

    assert_eq!(h.balance(a.id).await, Money::from_minor(100_000));
    assert_eq!(h.balance(b.id).await, Money::from_minor(100_000));
    assert_eq!(total_minor(&h.store), total_before);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_withdrawals_never_overdraw() {
    let h = Harness::new();
    let wallet = h.funded_wallet(dec!(10)).await;

    let mut handles = Vec::new();
    for _ in 0..20 {
        let engine = h.engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .withdraw(&OpContext::background(), wallet.id, dec!(1), "")
                .await
        }));
    }

    let mut succeeded = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(LedgerError::InsufficientFunds { .. }) => rejected += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert_eq!(succeeded, 10);
    assert_eq!(rejected, 10);
    assert_eq!(h.balance(wallet.id).await, Money::ZERO);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reads_during_writes_see_committed_balances() {
    let h = Harness::new();
    let wallet = h.wallet().await;

    let writer = {
        let engine = h.engine.clone();
        tokio::spawn(async move {
            for _ in 0..25 {
                engine
                    .deposit(&OpContext::background(), wallet.id, dec!(2), "")
                    .await
                    .unwrap();
            }
        })
    };

    let reader = {
        let engine = h.engine.clone();
        tokio::spawn(async move {
            for _ in 0..25 {
                let seen = engine
                    .get_wallet(&OpContext::background(), wallet.id)
                    .await
                    .unwrap();
                assert!(!seen.balance.is_negative());
                assert_eq!(seen.balance.minor() % 200, 0);
            }
        })
    };

    writer.await.unwrap();
    reader.await.unwrap();
    assert_eq!(h.balance(wallet.id).await, Money::from_minor(5_000));
}
