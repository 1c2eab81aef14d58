//! Transaction record writer
//!
//! Builds the audit entries for each balance mutation and appends them
//! through an open storage transaction. Every record gets its own UUID v4,
//! including the two sides of a transfer.

use crate::error::{LedgerError, Result};
use crate::money::Money;
use crate::storage::StoreTransaction;
use crate::types::{NewTransactionRecord, TransactionKind, TransactionRecord, WalletId};
use uuid::Uuid;

/// Balance of one wallet before and after a mutation, observed under its row lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceChange {
    pub wallet_id: WalletId,
    pub before: Money,
    pub after: Money,
}

/// Credit record for a deposit
pub fn deposit(change: BalanceChange, amount: Money, description: &str) -> NewTransactionRecord {
    build(TransactionKind::Deposit, change, amount, None, description)
}

/// Debit record for a withdrawal; `amount` is the positive quantity withdrawn
pub fn withdraw(change: BalanceChange, amount: Money, description: &str) -> Result<NewTransactionRecord> {
    let debit = negate(amount)?;
    Ok(build(TransactionKind::Withdraw, change, debit, None, description))
}

/// Debit record on the source and credit record on the destination
pub fn transfer(
    source: BalanceChange,
    destination: BalanceChange,
    amount: Money,
    description: &str,
) -> Result<(NewTransactionRecord, NewTransactionRecord)> {
    let counterparties = Some((source.wallet_id, destination.wallet_id));
    let debit = build(
        TransactionKind::Transfer,
        source,
        negate(amount)?,
        counterparties,
        description,
    );
    let credit = build(
        TransactionKind::Transfer,
        destination,
        amount,
        counterparties,
        description,
    );
    Ok((debit, credit))
}

/// Check `balance_after == balance_before + amount`
pub fn verify(record: &NewTransactionRecord) -> Result<()> {
    if record.balance_before.checked_add(record.amount) != Some(record.balance_after) {
        return Err(LedgerError::InvariantViolation(format!(
            "{} record {} on wallet {}: {} + {} != {}",
            record.kind,
            record.transaction_uuid,
            record.wallet_id,
            record.balance_before,
            record.amount,
            record.balance_after
        )));
    }
    Ok(())
}

/// Verify and append a record. A violation is returned before anything is
/// written; the caller drops the transaction, which rolls it back.
pub async fn append<T: StoreTransaction>(
    tx: &mut T,
    record: NewTransactionRecord,
) -> Result<TransactionRecord> {
    verify(&record)?;
    tx.insert_record(record).await
}

fn build(
    kind: TransactionKind,
    change: BalanceChange,
    amount: Money,
    counterparties: Option<(WalletId, WalletId)>,
    description: &str,
) -> NewTransactionRecord {
    NewTransactionRecord {
        transaction_uuid: Uuid::new_v4(),
        wallet_id: change.wallet_id,
        kind,
        amount,
        balance_before: change.before,
        balance_after: change.after,
        from_wallet: counterparties.map(|(from, _)| from),
        to_wallet: counterparties.map(|(_, to)| to),
        description: description.to_string(),
    }
}

fn negate(amount: Money) -> Result<Money> {
    amount
        .checked_neg()
        .ok_or_else(|| LedgerError::InvalidAmount(format!("{} cannot be debited", amount)))
}
