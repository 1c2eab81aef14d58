//! Error types for the wallet ledger

use crate::money::Money;
use crate::types::{AccountId, WalletId};
use std::time::Duration;
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Amount is zero, negative, or not representable in minor units
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Transfer between a wallet and itself
    #[error("Invalid transfer: {0}")]
    InvalidTransfer(String),

    /// Pagination window outside the accepted range
    #[error("Invalid pagination: {0}")]
    InvalidPagination(String),

    /// Wallet not found (message names the side for transfers)
    #[error("Wallet not found: {0}")]
    WalletNotFound(String),

    /// Account not found
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    /// Source balance cannot cover the debit
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds {
        /// Amount the operation needed
        required: Money,
        /// Balance at the time the row was locked
        available: Money,
    },

    /// Storage fault; the storage transaction was rolled back
    #[error("Storage error: {0}")]
    Storage(String),

    /// Record arithmetic did not hold (balance_after != balance_before + amount)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Caller deadline passed before the operation finished
    #[error("Deadline exceeded after {0:?}")]
    DeadlineExceeded(Duration),

    /// Caller cancelled the operation
    #[error("Operation cancelled")]
    Cancelled,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl LedgerError {
    /// Wallet-not-found for a plain lookup
    pub fn wallet_not_found(wallet_id: WalletId) -> Self {
        LedgerError::WalletNotFound(wallet_id.to_string())
    }

    /// True for outcomes attributable to the caller's request rather than
    /// to infrastructure.
    pub fn is_business_error(&self) -> bool {
        matches!(
            self,
            LedgerError::InvalidAmount(_)
                | LedgerError::InvalidTransfer(_)
                | LedgerError::InvalidPagination(_)
                | LedgerError::WalletNotFound(_)
                | LedgerError::AccountNotFound(_)
                | LedgerError::InsufficientFunds { .. }
        )
    }

    /// Stable label used in logs and metrics
    pub fn error_type(&self) -> &'static str {
        match self {
            LedgerError::InvalidAmount(_) => "invalid_amount",
            LedgerError::InvalidTransfer(_) => "invalid_transfer",
            LedgerError::InvalidPagination(_) => "invalid_pagination",
            LedgerError::WalletNotFound(_) => "wallet_not_found",
            LedgerError::AccountNotFound(_) => "account_not_found",
            LedgerError::InsufficientFunds { .. } => "insufficient_funds",
            LedgerError::Storage(_) => "storage_failure",
            LedgerError::InvariantViolation(_) => "invariant_violation",
            LedgerError::DeadlineExceeded(_) => "deadline_exceeded",
            LedgerError::Cancelled => "cancelled",
            LedgerError::Config(_) => "config_error",
        }
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        LedgerError::Storage(err.to_string())
    }
}

impl From<config::ConfigError> for LedgerError {
    fn from(err: config::ConfigError) -> Self {
        LedgerError::Config(err.to_string())
    }
}
