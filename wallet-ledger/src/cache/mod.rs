//! Cache gateway
//!
//! The cache is an accelerator, never the source of truth. Adapters report
//! faults through [`CacheError`]; [`WalletCache`] is the only caller and it
//! swallows them: a failed read is a miss, a failed write or delete is
//! logged and counted. No cache error ever reaches an engine caller, and
//! every command is bounded by a short timeout so a stalled server cannot
//! hold up a committed mutation.

pub mod memory;
pub mod redis;

use crate::metrics::Metrics;
use crate::types::{AccountId, TransactionRecord, Wallet, WalletId};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub use self::memory::{MemoryCache, NoopCache};
pub use self::redis::RedisCache;

/// Result type for cache adapters
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Cache adapter errors
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache unavailable: {0}")]
    Unavailable(String),

    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cache command timed out after {0:?}")]
    Timeout(Duration),
}

/// Key-value store with TTL expiry and pattern deletion
#[async_trait]
pub trait CacheGateway: Send + Sync {
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> CacheResult<()>;

    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Delete every key matching a glob pattern (`*` and `?`); returns the
    /// number of keys removed
    async fn delete_pattern(&self, pattern: &str) -> CacheResult<u64>;

    /// Release the connection. Later calls report `Unavailable`.
    async fn disconnect(&self) {}
}

/// Cache key layout
pub mod keys {
    use crate::types::{AccountId, WalletId};

    pub fn wallet(wallet_id: WalletId) -> String {
        format!("wallet:{}", wallet_id)
    }

    pub fn transactions_page(wallet_id: WalletId, limit: i64, offset: i64) -> String {
        format!("wallet:{}:transactions:{}:{}", wallet_id, limit, offset)
    }

    /// Matches every cached history page of one wallet, and only that wallet
    pub fn transactions_pattern(wallet_id: WalletId) -> String {
        format!("wallet:{}:transactions:*", wallet_id)
    }

    pub fn account(account_id: AccountId) -> String {
        format!("user:{}", account_id)
    }
}

/// Typed, fault-tolerant view of a [`CacheGateway`] used by the engine
#[derive(Clone)]
pub struct WalletCache {
    gateway: Arc<dyn CacheGateway>,
    metrics: Metrics,
    wallet_ttl: Duration,
    transactions_ttl: Duration,
    command_timeout: Duration,
}

impl WalletCache {
    pub fn new(
        gateway: Arc<dyn CacheGateway>,
        metrics: Metrics,
        wallet_ttl: Duration,
        transactions_ttl: Duration,
        command_timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            metrics,
            wallet_ttl,
            transactions_ttl,
            command_timeout,
        }
    }

    pub fn gateway(&self) -> &Arc<dyn CacheGateway> {
        &self.gateway
    }

    // =========================================================================
    // WALLETS
    // =========================================================================

    pub async fn get_wallet(&self, wallet_id: WalletId) -> Option<Wallet> {
        self.get_json(&keys::wallet(wallet_id)).await
    }

    pub async fn set_wallet(&self, wallet: &Wallet) {
        self.set_json(&keys::wallet(wallet.id), wallet, self.wallet_ttl)
            .await
    }

    // =========================================================================
    // TRANSACTION HISTORY PAGES
    // =========================================================================

    pub async fn get_transactions(
        &self,
        wallet_id: WalletId,
        limit: i64,
        offset: i64,
    ) -> Option<Vec<TransactionRecord>> {
        self.get_json(&keys::transactions_page(wallet_id, limit, offset))
            .await
    }

    pub async fn set_transactions(
        &self,
        wallet_id: WalletId,
        limit: i64,
        offset: i64,
        records: &[TransactionRecord],
    ) {
        self.set_json(
            &keys::transactions_page(wallet_id, limit, offset),
            &records,
            self.transactions_ttl,
        )
        .await
    }

    // =========================================================================
    // INVALIDATION
    // =========================================================================

    /// Drop the cached wallet and every cached history page for it
    pub async fn invalidate_wallet(&self, wallet_id: WalletId) {
        self.delete(&keys::wallet(wallet_id)).await;

        let pattern = keys::transactions_pattern(wallet_id);
        match self.bounded(self.gateway.delete_pattern(&pattern)).await {
            Ok(removed) => debug!(%wallet_id, removed, "Invalidated transaction history cache"),
            Err(e) => {
                self.metrics.record_cache_error("delete_pattern");
                warn!(%wallet_id, error = %e, "Failed to invalidate transaction history cache");
            }
        }
    }

    pub async fn invalidate_account(&self, account_id: AccountId) {
        self.delete(&keys::account(account_id)).await;
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.bounded(self.gateway.get(key)).await {
            Ok(Some(json)) => match serde_json::from_str(&json) {
                Ok(value) => {
                    self.metrics.record_cache_hit();
                    Some(value)
                }
                Err(e) => {
                    warn!(key, error = %e, "Discarding undecodable cache entry");
                    self.metrics.record_cache_miss();
                    None
                }
            },
            Ok(None) => {
                self.metrics.record_cache_miss();
                None
            }
            Err(e) => {
                self.metrics.record_cache_error("get");
                self.metrics.record_cache_miss();
                warn!(key, error = %e, "Cache read failed, falling back to storage");
                None
            }
        }
    }

    async fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) {
        let json = match serde_json::to_string(value) {
            Ok(json) => json,
            Err(e) => {
                warn!(key, error = %e, "Failed to serialize cache entry");
                return;
            }
        };

        if let Err(e) = self.bounded(self.gateway.set_ex(key, json, ttl)).await {
            self.metrics.record_cache_error("set");
            warn!(key, error = %e, "Failed to populate cache");
        }
    }

    async fn bounded<T, F>(&self, command: F) -> CacheResult<T>
    where
        F: Future<Output = CacheResult<T>>,
    {
        match tokio::time::timeout(self.command_timeout, command).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout(self.command_timeout)),
        }
    }

    async fn delete(&self, key: &str) {
        if let Err(e) = self.bounded(self.gateway.delete(key)).await {
            self.metrics.record_cache_error("delete");
            warn!(key, error = %e, "Failed to invalidate cache entry");
        }
    }
}

/// Glob match supporting `*` (any run) and `?` (one character), as used by
/// Redis `SCAN MATCH` for the patterns this crate generates
pub(crate) fn glob_match(pattern: &str, key: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let key: Vec<char> = key.chars().collect();

    let (mut p, mut k) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while k < key.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == key[k]) {
            p += 1;
            k += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, k));
            p += 1;
        } else if let Some((star_p, star_k)) = star {
            p = star_p + 1;
            k = star_k + 1;
            star = Some((star_p, star_k + 1));
        } else {
            return false;
        }
    }

    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }
    p == pattern.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(keys::wallet(WalletId(1)), "wallet:1");
        assert_eq!(
            keys::transactions_page(WalletId(1), 20, 40),
            "wallet:1:transactions:20:40"
        );
        assert_eq!(keys::account(AccountId(3)), "user:3");
    }

    #[test]
    fn test_history_pattern_is_wallet_scoped() {
        let pattern = keys::transactions_pattern(WalletId(1));
        assert!(glob_match(&pattern, "wallet:1:transactions:10:0"));
        assert!(glob_match(&pattern, "wallet:1:transactions:50:100"));
        assert!(!glob_match(&pattern, "wallet:12:transactions:10:0"));
        assert!(!glob_match(&pattern, "wallet:1"));
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("*", ""));
        assert!(glob_match("a*c", "abbbc"));
        assert!(glob_match("a?c", "abc"));
        assert!(!glob_match("a?c", "ac"));
        assert!(glob_match("*:x", "a:b:x"));
        assert!(!glob_match("abc", "abcd"));
    }
}
