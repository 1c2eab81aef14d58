//! Ledger engine
//!
//! Owns the locking protocol, the balance invariants and the cache
//! invalidation order. Every mutation runs in one scoped storage
//! transaction:
//!
//! 1. validate input (no storage access on failure)
//! 2. lock the affected wallet rows, ascending by id
//! 3. read balances, compute, persist
//! 4. append transaction records
//! 5. commit
//! 6. invalidate cache entries (best-effort)
//!
//! Steps 1-4 race the caller's deadline; any early return drops the
//! transaction, which rolls it back. Commit is never abandoned once issued,
//! and invalidation runs whenever a commit was issued.

use crate::cache::{CacheGateway, WalletCache};
use crate::config::{CacheConfig, EngineConfig};
use crate::context::OpContext;
use crate::error::{LedgerError, Result};
use crate::metrics::Metrics;
use crate::money::Money;
use crate::records::{self, BalanceChange};
use crate::storage::{LedgerStore, StoreTransaction};
use crate::types::{AccountId, TransactionRecord, Wallet, WalletId};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

/// Wallet ledger engine, shared across tasks behind an `Arc`
pub struct LedgerEngine<S: LedgerStore> {
    store: S,
    cache: WalletCache,
    metrics: Metrics,
    config: EngineConfig,
}

impl<S: LedgerStore> LedgerEngine<S> {
    pub fn new(
        store: S,
        gateway: Arc<dyn CacheGateway>,
        cache_config: &CacheConfig,
        config: EngineConfig,
        metrics: Metrics,
    ) -> Self {
        let cache = WalletCache::new(
            gateway,
            metrics.clone(),
            cache_config.wallet_ttl(),
            cache_config.transactions_ttl(),
            cache_config.command_timeout(),
        );

        Self {
            store,
            cache,
            metrics,
            config,
        }
    }

    /// Engine with default TTLs, timeouts and a fresh metrics registry
    pub fn with_defaults(store: S, gateway: Arc<dyn CacheGateway>) -> Self {
        Self::new(
            store,
            gateway,
            &CacheConfig::default(),
            EngineConfig::default(),
            Metrics::default(),
        )
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Release the cache connection
    pub async fn shutdown(&self) {
        self.cache.gateway().disconnect().await;
    }

    // =========================================================================
    // WALLET CREATION
    // =========================================================================

    /// Create a zero-balance wallet for an existing account
    pub async fn create_wallet(&self, ctx: &OpContext, account_id: AccountId) -> Result<Wallet> {
        let started = Instant::now();
        let result = self.create_wallet_inner(ctx, account_id).await;
        self.observe("create_wallet", started, &result);
        result
    }

    async fn create_wallet_inner(&self, ctx: &OpContext, account_id: AccountId) -> Result<Wallet> {
        ctx.run(self.config.operation_timeout(), async {
            self.store
                .find_account(account_id)
                .await?
                .ok_or(LedgerError::AccountNotFound(account_id))
        })
        .await?;

        // The insert is a single write; it is not abandoned once started
        let inserted = self.store.insert_wallet(account_id).await;
        self.cache.invalidate_account(account_id).await;
        let wallet = inserted?;

        info!(
            action = "wallet_created",
            %account_id,
            wallet_id = %wallet.id,
            "Wallet created"
        );
        Ok(wallet)
    }

    // =========================================================================
    // MUTATIONS
    // =========================================================================

    /// Credit a wallet. Returns the credit record.
    pub async fn deposit(
        &self,
        ctx: &OpContext,
        wallet_id: WalletId,
        amount: Decimal,
        description: &str,
    ) -> Result<TransactionRecord> {
        let started = Instant::now();
        let result = self.deposit_inner(ctx, wallet_id, amount, description).await;
        self.observe("deposit", started, &result);
        result
    }

    async fn deposit_inner(
        &self,
        ctx: &OpContext,
        wallet_id: WalletId,
        amount: Decimal,
        description: &str,
    ) -> Result<TransactionRecord> {
        let amount = Money::positive_amount(amount)?;

        let (tx, record, account_id) = ctx
            .run(self.config.operation_timeout(), async {
                let mut tx = self.store.begin().await?;

                let wallet = tx
                    .lock_wallet(wallet_id)
                    .await?
                    .ok_or_else(|| LedgerError::wallet_not_found(wallet_id))?;

                let after = wallet.balance.checked_add(amount).ok_or_else(|| {
                    LedgerError::InvalidAmount(format!(
                        "deposit of {} overflows wallet {}",
                        amount, wallet_id
                    ))
                })?;
                tx.update_balance(wallet_id, after).await?;

                let change = BalanceChange {
                    wallet_id,
                    before: wallet.balance,
                    after,
                };
                let record = records::append(&mut tx, records::deposit(change, amount, description))
                    .await?;

                Ok((tx, record, wallet.account_id))
            })
            .await?;

        let committed = tx.commit().await;
        self.cache.invalidate_wallet(wallet_id).await;
        committed?;

        info!(
            action = "deposit",
            transaction_type = "financial",
            %account_id,
            %wallet_id,
            %amount,
            transaction_uuid = %record.transaction_uuid,
            description,
            "Financial transaction completed"
        );
        Ok(record)
    }

    /// Debit a wallet. Returns the debit record (negative amount).
    pub async fn withdraw(
        &self,
        ctx: &OpContext,
        wallet_id: WalletId,
        amount: Decimal,
        description: &str,
    ) -> Result<TransactionRecord> {
        let started = Instant::now();
        let result = self.withdraw_inner(ctx, wallet_id, amount, description).await;
        self.observe("withdraw", started, &result);
        result
    }

    async fn withdraw_inner(
        &self,
        ctx: &OpContext,
        wallet_id: WalletId,
        amount: Decimal,
        description: &str,
    ) -> Result<TransactionRecord> {
        let amount = Money::positive_amount(amount)?;

        let (tx, record, account_id) = ctx
            .run(self.config.operation_timeout(), async {
                let mut tx = self.store.begin().await?;

                let wallet = tx
                    .lock_wallet(wallet_id)
                    .await?
                    .ok_or_else(|| LedgerError::wallet_not_found(wallet_id))?;

                let after = debit(wallet.balance, amount)?;
                tx.update_balance(wallet_id, after).await?;

                let change = BalanceChange {
                    wallet_id,
                    before: wallet.balance,
                    after,
                };
                let record =
                    records::append(&mut tx, records::withdraw(change, amount, description)?)
                        .await?;

                Ok((tx, record, wallet.account_id))
            })
            .await?;

        let committed = tx.commit().await;
        self.cache.invalidate_wallet(wallet_id).await;
        committed?;

        info!(
            action = "withdraw",
            transaction_type = "financial",
            %account_id,
            %wallet_id,
            %amount,
            transaction_uuid = %record.transaction_uuid,
            description,
            "Financial transaction completed"
        );
        Ok(record)
    }

    /// Move money between two distinct wallets atomically. Returns the
    /// debit record on the source.
    pub async fn transfer(
        &self,
        ctx: &OpContext,
        from: WalletId,
        to: WalletId,
        amount: Decimal,
        description: &str,
    ) -> Result<TransactionRecord> {
        let started = Instant::now();
        let result = self.transfer_inner(ctx, from, to, amount, description).await;
        self.observe("transfer", started, &result);
        result
    }

    async fn transfer_inner(
        &self,
        ctx: &OpContext,
        from: WalletId,
        to: WalletId,
        amount: Decimal,
        description: &str,
    ) -> Result<TransactionRecord> {
        let amount = Money::positive_amount(amount)?;
        if from == to {
            return Err(LedgerError::InvalidTransfer(
                "cannot transfer to the same wallet".to_string(),
            ));
        }

        let (tx, debit_record) = ctx
            .run(self.config.operation_timeout(), async {
                let mut tx = self.store.begin().await?;

                // Canonical lock order regardless of direction
                let (low, high) = if from < to { (from, to) } else { (to, from) };
                let low_wallet = lock_side(&mut tx, low, from).await?;
                let high_wallet = lock_side(&mut tx, high, from).await?;
                let (source, destination) = if low == from {
                    (low_wallet, high_wallet)
                } else {
                    (high_wallet, low_wallet)
                };
                debug!(%from, %to, "Transfer locks acquired");

                let source_after = debit(source.balance, amount)?;
                let destination_after =
                    destination.balance.checked_add(amount).ok_or_else(|| {
                        LedgerError::InvalidAmount(format!(
                            "transfer of {} overflows wallet {}",
                            amount, to
                        ))
                    })?;

                tx.update_balance(from, source_after).await?;
                tx.update_balance(to, destination_after).await?;

                let (debit_record, credit_record) = records::transfer(
                    BalanceChange {
                        wallet_id: from,
                        before: source.balance,
                        after: source_after,
                    },
                    BalanceChange {
                        wallet_id: to,
                        before: destination.balance,
                        after: destination_after,
                    },
                    amount,
                    description,
                )?;
                let debit_record = records::append(&mut tx, debit_record).await?;
                records::append(&mut tx, credit_record).await?;

                Ok((tx, debit_record))
            })
            .await?;

        let committed = tx.commit().await;
        self.cache.invalidate_wallet(from).await;
        self.cache.invalidate_wallet(to).await;
        committed?;

        info!(
            action = "transfer",
            transaction_type = "financial",
            from_wallet_id = %from,
            to_wallet_id = %to,
            %amount,
            transaction_uuid = %debit_record.transaction_uuid,
            description,
            "Financial transaction completed"
        );
        Ok(debit_record)
    }

    // =========================================================================
    // READS
    // =========================================================================

    /// Current wallet state, served from cache when possible
    pub async fn get_wallet(&self, ctx: &OpContext, wallet_id: WalletId) -> Result<Wallet> {
        let started = Instant::now();
        let result = ctx
            .run(self.config.operation_timeout(), async {
                if let Some(wallet) = self.cache.get_wallet(wallet_id).await {
                    return Ok(wallet);
                }

                let wallet = self
                    .store
                    .find_wallet(wallet_id)
                    .await?
                    .ok_or_else(|| LedgerError::wallet_not_found(wallet_id))?;
                self.cache.set_wallet(&wallet).await;
                Ok(wallet)
            })
            .await;
        self.observe("get_wallet", started, &result);
        result
    }

    /// One page of a wallet's history, newest first
    pub async fn get_transactions(
        &self,
        ctx: &OpContext,
        wallet_id: WalletId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TransactionRecord>> {
        let started = Instant::now();
        let result = self
            .get_transactions_inner(ctx, wallet_id, limit, offset)
            .await;
        self.observe("get_transactions", started, &result);
        result
    }

    async fn get_transactions_inner(
        &self,
        ctx: &OpContext,
        wallet_id: WalletId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TransactionRecord>> {
        if limit < 1 || limit > self.config.max_page_size {
            return Err(LedgerError::InvalidPagination(format!(
                "limit must be between 1 and {}, got {}",
                self.config.max_page_size, limit
            )));
        }
        if offset < 0 {
            return Err(LedgerError::InvalidPagination(format!(
                "offset must not be negative, got {}",
                offset
            )));
        }

        ctx.run(self.config.operation_timeout(), async {
            if let Some(page) = self.cache.get_transactions(wallet_id, limit, offset).await {
                return Ok(page);
            }

            if self.store.find_wallet(wallet_id).await?.is_none() {
                return Err(LedgerError::wallet_not_found(wallet_id));
            }

            let page = self.store.list_records(wallet_id, limit, offset).await?;
            self.cache
                .set_transactions(wallet_id, limit, offset, &page)
                .await;
            Ok(page)
        })
        .await
    }

    /// Every wallet owned by an account, ascending by id. Not cached.
    pub async fn get_account_wallets(
        &self,
        ctx: &OpContext,
        account_id: AccountId,
    ) -> Result<Vec<Wallet>> {
        let started = Instant::now();
        let result = ctx
            .run(self.config.operation_timeout(), async {
                self.store
                    .find_account(account_id)
                    .await?
                    .ok_or(LedgerError::AccountNotFound(account_id))?;
                self.store.list_wallets_for_account(account_id).await
            })
            .await;
        self.observe("get_account_wallets", started, &result);
        result
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    fn observe<T>(&self, operation: &'static str, started: Instant, result: &Result<T>) {
        let elapsed = started.elapsed().as_secs_f64();
        let outcome = match result {
            Ok(_) => "ok",
            Err(e) => e.error_type(),
        };
        self.metrics.record_operation(operation, outcome, elapsed);

        if let Err(e) = result {
            if e.is_business_error() {
                debug!(operation, error_type = outcome, error = %e, "Operation rejected");
            } else {
                error!(operation, error_type = outcome, error = %e, "Operation failed");
            }
        }
    }
}

/// Lock one side of a transfer, naming the side when it does not exist
async fn lock_side<T: StoreTransaction>(
    tx: &mut T,
    wallet_id: WalletId,
    source: WalletId,
) -> Result<Wallet> {
    tx.lock_wallet(wallet_id).await?.ok_or_else(|| {
        let side = if wallet_id == source {
            "source"
        } else {
            "destination"
        };
        LedgerError::WalletNotFound(format!("{} wallet {}", side, wallet_id))
    })
}

/// Balance after debiting `amount`; never negative
fn debit(balance: Money, amount: Money) -> Result<Money> {
    if balance < amount {
        return Err(LedgerError::InsufficientFunds {
            required: amount,
            available: balance,
        });
    }
    balance
        .checked_sub(amount)
        .ok_or_else(|| LedgerError::InvalidAmount(format!("{} cannot be debited", amount)))
}
