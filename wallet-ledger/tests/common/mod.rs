//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wallet_ledger::cache::{CacheError, CacheGateway, CacheResult};
use wallet_ledger::money::Money;
use wallet_ledger::storage::{MemoryTransaction, StoreTransaction};
use wallet_ledger::types::NewTransactionRecord;
use wallet_ledger::{
    Account, AccountId, LedgerEngine, LedgerError, LedgerStore, MemoryCache, MemoryStore,
    OpContext, TransactionRecord, Wallet, WalletId,
};

/// Engine over in-process storage and cache
pub struct Harness {
    pub engine: Arc<LedgerEngine<MemoryStore>>,
    pub store: MemoryStore,
    pub cache: Arc<MemoryCache>,
    pub account: Account,
}

impl Harness {
    pub fn new() -> Self {
        let store = MemoryStore::new();
        let account = store.create_account("alice", "$2b$10$hash");
        let cache = Arc::new(MemoryCache::new());
        let engine = Arc::new(LedgerEngine::with_defaults(store.clone(), cache.clone()));
        Self {
            engine,
            store,
            cache,
            account,
        }
    }

    pub async fn wallet(&self) -> Wallet {
        self.engine
            .create_wallet(&OpContext::background(), self.account.id)
            .await
            .unwrap()
    }

    /// New wallet holding `major` units
    pub async fn funded_wallet(&self, major: Decimal) -> Wallet {
        let wallet = self.wallet().await;
        self.engine
            .deposit(&OpContext::background(), wallet.id, major, "opening balance")
            .await
            .unwrap();
        wallet
    }

    pub async fn balance(&self, wallet_id: WalletId) -> Money {
        self.store
            .find_wallet(wallet_id)
            .await
            .unwrap()
            .unwrap()
            .balance
    }
}

/// Cache whose every command fails
pub struct FailingCache;

#[async_trait]
impl CacheGateway for FailingCache {
    async fn get(&self, _key: &str) -> CacheResult<Option<String>> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn set_ex(&self, _key: &str, _value: String, _ttl: Duration) -> CacheResult<()> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn delete(&self, _key: &str) -> CacheResult<()> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn delete_pattern(&self, _pattern: &str) -> CacheResult<u64> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }
}

/// Cache whose every command stalls until the caller gives up on it
pub struct HangingCache;

#[async_trait]
impl CacheGateway for HangingCache {
    async fn get(&self, _key: &str) -> CacheResult<Option<String>> {
        std::future::pending().await
    }

    async fn set_ex(&self, _key: &str, _value: String, _ttl: Duration) -> CacheResult<()> {
        std::future::pending().await
    }

    async fn delete(&self, _key: &str) -> CacheResult<()> {
        std::future::pending().await
    }

    async fn delete_pattern(&self, _pattern: &str) -> CacheResult<u64> {
        std::future::pending().await
    }
}

/// In-process store that applies every commit and wallet insert at once
/// but takes `ack_delay` to report success
#[derive(Clone)]
pub struct SlowAckStore {
    inner: MemoryStore,
    ack_delay: Duration,
}

impl SlowAckStore {
    pub fn new(inner: MemoryStore, ack_delay: Duration) -> Self {
        Self { inner, ack_delay }
    }
}

#[async_trait]
impl LedgerStore for SlowAckStore {
    type Tx = SlowAckTransaction;

    async fn begin(&self) -> wallet_ledger::Result<SlowAckTransaction> {
        Ok(SlowAckTransaction {
            inner: self.inner.begin().await?,
            ack_delay: self.ack_delay,
        })
    }

    async fn find_account(&self, account_id: AccountId) -> wallet_ledger::Result<Option<Account>> {
        self.inner.find_account(account_id).await
    }

    async fn insert_wallet(&self, account_id: AccountId) -> wallet_ledger::Result<Wallet> {
        let wallet = self.inner.insert_wallet(account_id).await?;
        tokio::time::sleep(self.ack_delay).await;
        Ok(wallet)
    }

    async fn find_wallet(&self, wallet_id: WalletId) -> wallet_ledger::Result<Option<Wallet>> {
        self.inner.find_wallet(wallet_id).await
    }

    async fn list_wallets_for_account(
        &self,
        account_id: AccountId,
    ) -> wallet_ledger::Result<Vec<Wallet>> {
        self.inner.list_wallets_for_account(account_id).await
    }

    async fn list_records(
        &self,
        wallet_id: WalletId,
        limit: i64,
        offset: i64,
    ) -> wallet_ledger::Result<Vec<TransactionRecord>> {
        self.inner.list_records(wallet_id, limit, offset).await
    }
}

pub struct SlowAckTransaction {
    inner: MemoryTransaction,
    ack_delay: Duration,
}

#[async_trait]
impl StoreTransaction for SlowAckTransaction {
    async fn lock_wallet(&mut self, wallet_id: WalletId) -> wallet_ledger::Result<Option<Wallet>> {
        self.inner.lock_wallet(wallet_id).await
    }

    async fn update_balance(&mut self, wallet_id: WalletId, balance: Money) -> wallet_ledger::Result<()> {
        self.inner.update_balance(wallet_id, balance).await
    }

    async fn insert_record(
        &mut self,
        record: NewTransactionRecord,
    ) -> wallet_ledger::Result<TransactionRecord> {
        self.inner.insert_record(record).await
    }

    async fn commit(self) -> wallet_ledger::Result<()> {
        self.inner.commit().await?;
        tokio::time::sleep(self.ack_delay).await;
        Ok(())
    }
}

/// In-process store whose transactions fail to insert records once a
/// transaction has already written `records_before_failure` of them
#[derive(Clone)]
pub struct FlakyStore {
    inner: MemoryStore,
    records_before_failure: Arc<AtomicUsize>,
}

impl FlakyStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            records_before_failure: Arc::new(AtomicUsize::new(usize::MAX)),
        }
    }

    pub fn fail_after_records(&self, count: usize) {
        self.records_before_failure.store(count, Ordering::SeqCst);
    }

    pub fn heal(&self) {
        self.records_before_failure
            .store(usize::MAX, Ordering::SeqCst);
    }
}

#[async_trait]
impl LedgerStore for FlakyStore {
    type Tx = FlakyTransaction;

    async fn begin(&self) -> wallet_ledger::Result<FlakyTransaction> {
        Ok(FlakyTransaction {
            inner: self.inner.begin().await?,
            written: 0,
            limit: self.records_before_failure.load(Ordering::SeqCst),
        })
    }

    async fn find_account(&self, account_id: AccountId) -> wallet_ledger::Result<Option<Account>> {
        self.inner.find_account(account_id).await
    }

    async fn insert_wallet(&self, account_id: AccountId) -> wallet_ledger::Result<Wallet> {
        self.inner.insert_wallet(account_id).await
    }

    async fn find_wallet(&self, wallet_id: WalletId) -> wallet_ledger::Result<Option<Wallet>> {
        self.inner.find_wallet(wallet_id).await
    }

    async fn list_wallets_for_account(
        &self,
        account_id: AccountId,
    ) -> wallet_ledger::Result<Vec<Wallet>> {
        self.inner.list_wallets_for_account(account_id).await
    }

    async fn list_records(
        &self,
        wallet_id: WalletId,
        limit: i64,
        offset: i64,
    ) -> wallet_ledger::Result<Vec<TransactionRecord>> {
        self.inner.list_records(wallet_id, limit, offset).await
    }
}

pub struct FlakyTransaction {
    inner: MemoryTransaction,
    written: usize,
    limit: usize,
}

#[async_trait]
impl StoreTransaction for FlakyTransaction {
    async fn lock_wallet(&mut self, wallet_id: WalletId) -> wallet_ledger::Result<Option<Wallet>> {
        self.inner.lock_wallet(wallet_id).await
    }

    async fn update_balance(&mut self, wallet_id: WalletId, balance: Money) -> wallet_ledger::Result<()> {
        self.inner.update_balance(wallet_id, balance).await
    }

    async fn insert_record(
        &mut self,
        record: NewTransactionRecord,
    ) -> wallet_ledger::Result<TransactionRecord> {
        if self.written >= self.limit {
            return Err(LedgerError::Storage("disk full".to_string()));
        }
        self.written += 1;
        self.inner.insert_record(record).await
    }

    async fn commit(self) -> wallet_ledger::Result<()> {
        self.inner.commit().await
    }
}

/// Sum of every committed balance, in minor units
pub fn total_minor(store: &MemoryStore) -> i64 {
    store.all_wallets().iter().map(|w| w.balance.minor()).sum()
}
