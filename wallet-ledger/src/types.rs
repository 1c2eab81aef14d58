//! Core types for the wallet ledger

use crate::money::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Account identifier
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct AccountId(pub i64);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Wallet identifier. Ordering defines the canonical row-lock order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct WalletId(pub i64);

impl fmt::Display for WalletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity holder. Created at registration, read-only to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Account {
    pub id: AccountId,
    pub handle: String,
    #[serde(skip_serializing, default)]
    pub credential_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Balance holder owned by exactly one account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Wallet {
    pub id: WalletId,
    pub account_id: AccountId,
    pub balance: Money,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Kind of balance-affecting event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Deposit,
    Transfer,
    Withdraw,
}

impl TransactionKind {
    /// Column value
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Deposit => "deposit",
            TransactionKind::Transfer => "transfer",
            TransactionKind::Withdraw => "withdraw",
        }
    }

    /// Parse a column value
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "deposit" => Some(TransactionKind::Deposit),
            "transfer" => Some(TransactionKind::Transfer),
            "withdraw" => Some(TransactionKind::Withdraw),
            _ => None,
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable audit entry for one balance-affecting event on one wallet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Storage identifier (insertion order)
    pub id: i64,

    /// Globally unique transaction identifier
    pub transaction_uuid: Uuid,

    pub wallet_id: WalletId,

    pub kind: TransactionKind,

    /// Positive for credit, negative for debit
    pub amount: Money,

    pub balance_before: Money,

    pub balance_after: Money,

    /// Source wallet, set on both sides of a transfer
    pub from_wallet: Option<WalletId>,

    /// Destination wallet, set on both sides of a transfer
    pub to_wallet: Option<WalletId>,

    pub description: String,

    pub created_at: DateTime<Utc>,
}

impl TransactionRecord {
    /// `balance_after == balance_before + amount`
    pub fn is_balanced(&self) -> bool {
        self.balance_before.checked_add(self.amount) == Some(self.balance_after)
    }
}

/// A record staged for insertion; storage assigns `id` and `created_at`
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransactionRecord {
    pub transaction_uuid: Uuid,
    pub wallet_id: WalletId,
    pub kind: TransactionKind,
    pub amount: Money,
    pub balance_before: Money,
    pub balance_after: Money,
    pub from_wallet: Option<WalletId>,
    pub to_wallet: Option<WalletId>,
    pub description: String,
}

impl NewTransactionRecord {
    /// Attach the storage-assigned fields
    pub fn into_record(self, id: i64, created_at: DateTime<Utc>) -> TransactionRecord {
        TransactionRecord {
            id,
            transaction_uuid: self.transaction_uuid,
            wallet_id: self.wallet_id,
            kind: self.kind,
            amount: self.amount,
            balance_before: self.balance_before,
            balance_after: self.balance_after,
            from_wallet: self.from_wallet,
            to_wallet: self.to_wallet,
            description: self.description,
            created_at,
        }
    }
}
