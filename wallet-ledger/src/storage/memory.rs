//! In-process storage adapter
//!
//! Committed state lives behind a `parking_lot` mutex that is never held
//! across an await. Row locks are per-wallet `tokio::sync::Mutex` leases
//! owned by the transaction; writes are staged in the transaction and
//! applied on commit, so dropping a transaction discards them.

use super::{LedgerStore, StoreTransaction};
use crate::error::{LedgerError, Result};
use crate::money::Money;
use crate::types::{Account, AccountId, NewTransactionRecord, TransactionRecord, Wallet, WalletId};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

#[derive(Default)]
struct State {
    accounts: BTreeMap<AccountId, Account>,
    wallets: BTreeMap<WalletId, Wallet>,
    records: Vec<TransactionRecord>,
    next_account_id: i64,
    next_wallet_id: i64,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    row_locks: DashMap<WalletId, Arc<tokio::sync::Mutex<()>>>,
    // Like a database sequence: ids consumed by rolled-back records are not reused
    next_record_id: AtomicI64,
}

/// Storage held in process memory
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an account. Registration is outside the engine; this exists
    /// for bootstrapping and tests.
    pub fn create_account(&self, handle: &str, credential_hash: &str) -> Account {
        let mut state = self.inner.state.lock();
        state.next_account_id += 1;
        let account = Account {
            id: AccountId(state.next_account_id),
            handle: handle.to_string(),
            credential_hash: credential_hash.to_string(),
            created_at: Utc::now(),
        };
        state.accounts.insert(account.id, account.clone());
        account
    }

    /// Every committed record, in insertion order
    pub fn all_records(&self) -> Vec<TransactionRecord> {
        let mut records = self.inner.state.lock().records.clone();
        records.sort_by_key(|r| r.id);
        records
    }

    /// Every committed wallet, ascending by id
    pub fn all_wallets(&self) -> Vec<Wallet> {
        self.inner.state.lock().wallets.values().cloned().collect()
    }

    fn row_lock(&self, wallet_id: WalletId) -> Arc<tokio::sync::Mutex<()>> {
        self.inner.row_locks.entry(wallet_id).or_default().clone()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    type Tx = MemoryTransaction;

    async fn begin(&self) -> Result<MemoryTransaction> {
        Ok(MemoryTransaction {
            store: self.clone(),
            leases: HashMap::new(),
            balances: HashMap::new(),
            records: Vec::new(),
        })
    }

    async fn find_account(&self, account_id: AccountId) -> Result<Option<Account>> {
        Ok(self.inner.state.lock().accounts.get(&account_id).cloned())
    }

    async fn insert_wallet(&self, account_id: AccountId) -> Result<Wallet> {
        let mut state = self.inner.state.lock();
        if !state.accounts.contains_key(&account_id) {
            return Err(LedgerError::Storage(format!(
                "foreign key violation: account {} does not exist",
                account_id
            )));
        }

        state.next_wallet_id += 1;
        let now = Utc::now();
        let wallet = Wallet {
            id: WalletId(state.next_wallet_id),
            account_id,
            balance: Money::ZERO,
            created_at: now,
            updated_at: now,
        };
        state.wallets.insert(wallet.id, wallet.clone());
        Ok(wallet)
    }

    async fn find_wallet(&self, wallet_id: WalletId) -> Result<Option<Wallet>> {
        Ok(self.inner.state.lock().wallets.get(&wallet_id).cloned())
    }

    async fn list_wallets_for_account(&self, account_id: AccountId) -> Result<Vec<Wallet>> {
        let state = self.inner.state.lock();
        Ok(state
            .wallets
            .values()
            .filter(|w| w.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn list_records(
        &self,
        wallet_id: WalletId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TransactionRecord>> {
        let mut records: Vec<TransactionRecord> = {
            let state = self.inner.state.lock();
            state
                .records
                .iter()
                .filter(|r| r.wallet_id == wallet_id)
                .cloned()
                .collect()
        };
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        Ok(records
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }
}

/// Open transaction against a [`MemoryStore`]
pub struct MemoryTransaction {
    store: MemoryStore,
    leases: HashMap<WalletId, OwnedMutexGuard<()>>,
    balances: HashMap<WalletId, Money>,
    records: Vec<TransactionRecord>,
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn lock_wallet(&mut self, wallet_id: WalletId) -> Result<Option<Wallet>> {
        if !self.leases.contains_key(&wallet_id) {
            let exists = self.store.inner.state.lock().wallets.contains_key(&wallet_id);
            if !exists {
                return Ok(None);
            }
            let lease = self.store.row_lock(wallet_id).lock_owned().await;
            self.leases.insert(wallet_id, lease);
        }

        let committed = self.store.inner.state.lock().wallets.get(&wallet_id).cloned();
        Ok(committed.map(|mut wallet| {
            if let Some(balance) = self.balances.get(&wallet_id) {
                wallet.balance = *balance;
            }
            wallet
        }))
    }

    async fn update_balance(&mut self, wallet_id: WalletId, balance: Money) -> Result<()> {
        if !self.leases.contains_key(&wallet_id) {
            return Err(LedgerError::Storage(format!(
                "wallet {} updated without holding its row lock",
                wallet_id
            )));
        }
        self.balances.insert(wallet_id, balance);
        Ok(())
    }

    async fn insert_record(&mut self, record: NewTransactionRecord) -> Result<TransactionRecord> {
        let id = self.store.inner.next_record_id.fetch_add(1, Ordering::SeqCst) + 1;
        let record = record.into_record(id, Utc::now());
        self.records.push(record.clone());
        Ok(record)
    }

    async fn commit(self) -> Result<()> {
        let MemoryTransaction {
            store,
            leases,
            balances,
            records,
        } = self;

        {
            let mut state = store.inner.state.lock();
            let now = Utc::now();
            for (wallet_id, balance) in balances {
                if let Some(wallet) = state.wallets.get_mut(&wallet_id) {
                    wallet.balance = balance;
                    wallet.updated_at = now;
                }
            }
            state.records.extend(records);
        }

        // Leases are released only after the new state is visible
        drop(leases);
        Ok(())
    }
}
