//! Storage gateway
//!
//! The engine depends only on these traits. A [`StoreTransaction`] is a
//! scoped unit of work: row locks taken through it are held until it ends,
//! and dropping it without [`StoreTransaction::commit`] rolls it back.
//!
//! Not-found is reported as `Ok(None)` so it stays distinguishable from
//! storage faults.

pub mod memory;
pub mod postgres;

use crate::error::Result;
use crate::money::Money;
use crate::types::{Account, AccountId, NewTransactionRecord, TransactionRecord, Wallet, WalletId};
use async_trait::async_trait;

pub use memory::{MemoryStore, MemoryTransaction};
pub use postgres::{PgStore, PgTransaction};

/// Transactional store holding accounts, wallets and transaction records
#[async_trait]
pub trait LedgerStore: Send + Sync + 'static {
    /// Scoped transaction type
    type Tx: StoreTransaction;

    /// Open a scoped transaction
    async fn begin(&self) -> Result<Self::Tx>;

    /// Look up an account
    async fn find_account(&self, account_id: AccountId) -> Result<Option<Account>>;

    /// Insert a wallet with zero balance
    async fn insert_wallet(&self, account_id: AccountId) -> Result<Wallet>;

    /// Read committed wallet state without locking
    async fn find_wallet(&self, wallet_id: WalletId) -> Result<Option<Wallet>>;

    /// Wallets owned by an account, ascending by id
    async fn list_wallets_for_account(&self, account_id: AccountId) -> Result<Vec<Wallet>>;

    /// Records for a wallet, newest first, ties broken by later insertion first
    async fn list_records(
        &self,
        wallet_id: WalletId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TransactionRecord>>;
}

/// One open storage transaction
#[async_trait]
pub trait StoreTransaction: Send {
    /// Acquire an exclusive lock on the wallet row, held until the
    /// transaction ends. Blocks while another transaction holds it.
    async fn lock_wallet(&mut self, wallet_id: WalletId) -> Result<Option<Wallet>>;

    /// Persist a new balance for a wallet locked by this transaction
    async fn update_balance(&mut self, wallet_id: WalletId, balance: Money) -> Result<()>;

    /// Append a transaction record
    async fn insert_record(&mut self, record: NewTransactionRecord) -> Result<TransactionRecord>;

    /// Make every change durable and release the locks
    async fn commit(self) -> Result<()>;
}
