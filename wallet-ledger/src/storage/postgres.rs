//! PostgreSQL storage adapter
//!
//! Row locks are `SELECT ... FOR UPDATE` inside a sqlx transaction. sqlx
//! rolls a transaction back when it is dropped without a commit.

use super::{LedgerStore, StoreTransaction};
use crate::config::DatabaseConfig;
use crate::error::{LedgerError, Result};
use crate::money::Money;
use crate::types::{
    Account, AccountId, NewTransactionRecord, TransactionKind, TransactionRecord, Wallet, WalletId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, Postgres, Transaction};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// SQLSTATE raised when `lock_timeout` expires
const LOCK_NOT_AVAILABLE: &str = "55P03";

const SCHEMA: &str = include_str!("../../migrations/0001_wallet_ledger.sql");

const WALLET_COLUMNS: &str = "id, account_id, balance, created_at, updated_at";

const RECORD_COLUMNS: &str = "id, transaction_uuid, wallet_id, kind, amount, balance_before, \
     balance_after, from_wallet_id, to_wallet_id, description, created_at";

/// Storage backed by a PostgreSQL pool
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PgStore {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.url)
            .await?;

        info!(
            max_connections = config.max_connections,
            "Connected to PostgreSQL"
        );

        Ok(Self::from_pool(
            pool,
            Duration::from_millis(config.lock_timeout_ms),
        ))
    }

    pub fn from_pool(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables and indexes if they do not exist
    pub async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("Wallet ledger schema is up to date");
        Ok(())
    }

    /// Register an account. Registration is outside the engine; this exists
    /// for bootstrapping and tests.
    pub async fn insert_account(&self, handle: &str, credential_hash: &str) -> Result<Account> {
        let account = sqlx::query_as::<_, Account>(
            r#"
            INSERT INTO accounts (handle, credential_hash)
            VALUES ($1, $2)
            RETURNING id, handle, credential_hash, created_at
            "#,
        )
        .bind(handle)
        .bind(credential_hash)
        .fetch_one(&self.pool)
        .await?;

        Ok(account)
    }
}

#[derive(FromRow)]
struct RecordRow {
    id: i64,
    transaction_uuid: Uuid,
    wallet_id: WalletId,
    kind: String,
    amount: Money,
    balance_before: Money,
    balance_after: Money,
    from_wallet_id: Option<WalletId>,
    to_wallet_id: Option<WalletId>,
    description: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<RecordRow> for TransactionRecord {
    type Error = LedgerError;

    fn try_from(row: RecordRow) -> Result<Self> {
        let kind = TransactionKind::parse(&row.kind).ok_or_else(|| {
            LedgerError::Storage(format!(
                "transaction {} has unknown kind {:?}",
                row.id, row.kind
            ))
        })?;

        Ok(TransactionRecord {
            id: row.id,
            transaction_uuid: row.transaction_uuid,
            wallet_id: row.wallet_id,
            kind,
            amount: row.amount,
            balance_before: row.balance_before,
            balance_after: row.balance_after,
            from_wallet: row.from_wallet_id,
            to_wallet: row.to_wallet_id,
            description: row.description,
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl LedgerStore for PgStore {
    type Tx = PgTransaction;

    async fn begin(&self) -> Result<PgTransaction> {
        let mut tx = self.pool.begin().await?;

        // SET does not take bind parameters
        let lock_timeout = format!("SET LOCAL lock_timeout = '{}ms'", self.lock_timeout.as_millis());
        sqlx::query(&lock_timeout).execute(&mut *tx).await?;

        Ok(PgTransaction {
            tx,
            lock_timeout: self.lock_timeout,
        })
    }

    async fn find_account(&self, account_id: AccountId) -> Result<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(
            r#"
            SELECT id, handle, credential_hash, created_at
            FROM accounts
            WHERE id = $1
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(account)
    }

    async fn insert_wallet(&self, account_id: AccountId) -> Result<Wallet> {
        let wallet = sqlx::query_as::<_, Wallet>(&format!(
            "INSERT INTO wallets (account_id, balance) VALUES ($1, 0) RETURNING {}",
            WALLET_COLUMNS
        ))
        .bind(account_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(wallet)
    }

    async fn find_wallet(&self, wallet_id: WalletId) -> Result<Option<Wallet>> {
        let wallet = sqlx::query_as::<_, Wallet>(&format!(
            "SELECT {} FROM wallets WHERE id = $1",
            WALLET_COLUMNS
        ))
        .bind(wallet_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(wallet)
    }

    async fn list_wallets_for_account(&self, account_id: AccountId) -> Result<Vec<Wallet>> {
        let wallets = sqlx::query_as::<_, Wallet>(&format!(
            "SELECT {} FROM wallets WHERE account_id = $1 ORDER BY id",
            WALLET_COLUMNS
        ))
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(wallets)
    }

    async fn list_records(
        &self,
        wallet_id: WalletId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TransactionRecord>> {
        let rows = sqlx::query_as::<_, RecordRow>(&format!(
            r#"
            SELECT {}
            FROM transactions
            WHERE wallet_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
            RECORD_COLUMNS
        ))
        .bind(wallet_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TransactionRecord::try_from).collect()
    }
}

/// Open PostgreSQL transaction
pub struct PgTransaction {
    tx: Transaction<'static, Postgres>,
    lock_timeout: Duration,
}

/// A row-lock wait cut short by `lock_timeout` is a deadline, not a storage fault
fn lock_wait_error(err: sqlx::Error, lock_timeout: Duration) -> LedgerError {
    match &err {
        sqlx::Error::Database(db) if db.code().as_deref() == Some(LOCK_NOT_AVAILABLE) => {
            LedgerError::DeadlineExceeded(lock_timeout)
        }
        _ => LedgerError::from(err),
    }
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    async fn lock_wallet(&mut self, wallet_id: WalletId) -> Result<Option<Wallet>> {
        let wallet = sqlx::query_as::<_, Wallet>(&format!(
            "SELECT {} FROM wallets WHERE id = $1 FOR UPDATE",
            WALLET_COLUMNS
        ))
        .bind(wallet_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| lock_wait_error(e, self.lock_timeout))?;

        Ok(wallet)
    }

    async fn update_balance(&mut self, wallet_id: WalletId, balance: Money) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE wallets
            SET balance = $1, updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(balance)
        .bind(wallet_id)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() != 1 {
            return Err(LedgerError::Storage(format!(
                "balance update touched {} rows for wallet {}",
                result.rows_affected(),
                wallet_id
            )));
        }
        Ok(())
    }

    async fn insert_record(&mut self, record: NewTransactionRecord) -> Result<TransactionRecord> {
        let (id, created_at) = sqlx::query_as::<_, (i64, DateTime<Utc>)>(
            r#"
            INSERT INTO transactions (
                transaction_uuid, wallet_id, kind, amount, balance_before,
                balance_after, from_wallet_id, to_wallet_id, description
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id, created_at
            "#,
        )
        .bind(record.transaction_uuid)
        .bind(record.wallet_id)
        .bind(record.kind.as_str())
        .bind(record.amount)
        .bind(record.balance_before)
        .bind(record.balance_after)
        .bind(record.from_wallet)
        .bind(record.to_wallet)
        .bind(&record.description)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(record.into_record(id, created_at))
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::error::{DatabaseError, ErrorKind};
    use std::borrow::Cow;
    use std::error::Error as StdError;
    use std::fmt;

    #[derive(Debug)]
    struct PgCode(&'static str);

    impl fmt::Display for PgCode {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "database error {}", self.0)
        }
    }

    impl StdError for PgCode {}

    impl DatabaseError for PgCode {
        fn message(&self) -> &str {
            "canceling statement due to lock timeout"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            Some(Cow::Borrowed(self.0))
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            ErrorKind::Other
        }
    }

    #[test]
    fn test_lock_timeout_is_deadline() {
        let err = sqlx::Error::Database(Box::new(PgCode(LOCK_NOT_AVAILABLE)));
        let mapped = lock_wait_error(err, Duration::from_millis(3_000));
        assert!(matches!(
            mapped,
            LedgerError::DeadlineExceeded(d) if d == Duration::from_millis(3_000)
        ));
        assert!(!mapped.is_business_error());
    }

    #[test]
    fn test_other_database_errors_are_storage() {
        // serialization_failure
        let err = sqlx::Error::Database(Box::new(PgCode("40001")));
        assert!(matches!(
            lock_wait_error(err, Duration::from_secs(3)),
            LedgerError::Storage(_)
        ));
        assert!(matches!(
            lock_wait_error(sqlx::Error::PoolTimedOut, Duration::from_secs(3)),
            LedgerError::Storage(_)
        ));
    }
}
