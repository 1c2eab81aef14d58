//! Wallet Ledger
//!
//! Ledger-backed wallet engine: per-account balances in integer minor
//! units, deposits, withdrawals and atomic two-wallet transfers, with
//! cache-aside reads of wallets and transaction history.
//!
//! # Architecture
//!
//! - **Storage gateway**: scoped transactions with pessimistic row locks
//!   ([`storage::LedgerStore`]); PostgreSQL and in-process adapters
//! - **Cache gateway**: TTL key-value store with pattern deletion
//!   ([`cache::CacheGateway`]); Redis, in-process and disabled adapters
//! - **Engine**: [`LedgerEngine`] owns locking, invariants and invalidation
//!
//! # Invariants
//!
//! - No wallet balance is ever negative
//! - Every record satisfies `balance_after == balance_before + amount`
//! - A transfer writes exactly two records that sum to zero
//! - Two-wallet operations lock rows in ascending wallet-id order
//!
//! # Example
//!
//! ```no_run
//! use rust_decimal::Decimal;
//! use std::sync::Arc;
//! use wallet_ledger::{LedgerEngine, MemoryCache, MemoryStore, OpContext};
//!
//! #[tokio::main]
//! async fn main() -> wallet_ledger::Result<()> {
//!     let store = MemoryStore::new();
//!     let account = store.create_account("alice", "hash");
//!     let engine = LedgerEngine::with_defaults(store, Arc::new(MemoryCache::new()));
//!
//!     let ctx = OpContext::background();
//!     let wallet = engine.create_wallet(&ctx, account.id).await?;
//!     engine
//!         .deposit(&ctx, wallet.id, Decimal::new(20050, 2), "salary")
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]

pub mod cache;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod money;
pub mod records;
pub mod storage;
pub mod telemetry;
pub mod types;

// Re-exports
pub use cache::{CacheGateway, MemoryCache, NoopCache, RedisCache, WalletCache};
pub use crate::config::Config;
pub use context::OpContext;
pub use engine::LedgerEngine;
pub use error::{LedgerError, Result};
pub use metrics::Metrics;
pub use money::Money;
pub use storage::{LedgerStore, MemoryStore, PgStore, StoreTransaction};
pub use types::{Account, AccountId, TransactionKind, TransactionRecord, Wallet, WalletId};
