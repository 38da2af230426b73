//! Ledger collaborator seam.
//!
//! The balance ledger is an external system from this crate's point of
//! view: the executor only needs account resolution, credit/debit with a
//! before/after balance, and the owner's approved-recipient list. The
//! [`Ledger`] trait is that contract; [`MemoryLedger`] is the in-process
//! implementation used by tests and the demo daemon wiring.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::money::Amount;

/// Point-in-time view of a resolved account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSnapshot {
    /// The account number money moves against.
    pub account_number: String,
    /// Display name of the account holder.
    pub display_name: String,
    /// Balance at resolution time.
    pub balance: Amount,
}

/// Ledger failures.
///
/// `AccountNotFound` and `InsufficientFunds` are business failures the
/// executor converts into typed redemption results; `Unavailable` is the
/// infrastructure fault class (storage unreachable, backend down) and is
/// reported as a retryable generic failure without consuming a use.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum LedgerError {
    /// No account resolves for the owner key.
    #[error("no account found for owner key")]
    AccountNotFound,

    /// Debit larger than the available balance.
    #[error("insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds {
        /// Balance at the time of the attempt.
        balance: Amount,
        /// Requested debit amount.
        requested: Amount,
    },

    /// The ledger backend could not serve the request.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

/// Balance ledger contract consumed by the action executor.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Resolves the account operated on by `owner_key`.
    async fn resolve_account(&self, owner_key: &str)
        -> Result<Option<AccountSnapshot>, LedgerError>;

    /// Credits the account and returns the new balance.
    async fn credit(&self, owner_key: &str, amount: Amount) -> Result<Amount, LedgerError>;

    /// Debits the account and returns the new balance.
    ///
    /// # Errors
    ///
    /// [`LedgerError::InsufficientFunds`] when the balance cannot cover
    /// the debit; the balance is left unchanged.
    async fn debit(&self, owner_key: &str, amount: Amount) -> Result<Amount, LedgerError>;

    /// The owner's pre-registered approved recipients (raw form; callers
    /// normalize before comparing).
    async fn approved_recipients(&self, owner_key: &str) -> Result<Vec<String>, LedgerError>;
}

// =============================================================================
// Transaction audit records
// =============================================================================

/// Kind tag on a [`TransactionRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    /// Cash withdrawal.
    Withdraw,
    /// Cash deposit.
    Deposit,
    /// Transfer to another account.
    Transfer,
    /// Balance read; no money moved.
    BalanceCheck,
}

/// Audit record describing one executed operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Operation kind.
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    /// Amount moved; `None` for balance checks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<Amount>,
    /// Recipient account number for transfers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient_account_number: Option<String>,
    /// Balance after the operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance_after: Option<Amount>,
    /// Description carried over from the action.
    pub description: String,
    /// Whether the transfer fraud gate flagged this operation.
    #[serde(default)]
    pub fraud_flagged: bool,
    /// When the operation executed.
    pub timestamp: DateTime<Utc>,
}

// =============================================================================
// MemoryLedger
// =============================================================================

#[derive(Debug, Clone)]
struct AccountState {
    account_number: String,
    display_name: String,
    balance: Amount,
    approved_recipients: Vec<String>,
}

/// In-memory ledger keyed by owner key.
///
/// Mutations are single atomic sections under one mutex; no await happens
/// while the lock is held.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    accounts: Mutex<HashMap<String, AccountState>>,
}

impl MemoryLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces an account.
    pub fn upsert_account(
        &self,
        owner_key: impl Into<String>,
        account_number: impl Into<String>,
        display_name: impl Into<String>,
        opening_balance: Amount,
        approved_recipients: Vec<String>,
    ) {
        self.accounts.lock().expect("ledger lock poisoned").insert(
            owner_key.into(),
            AccountState {
                account_number: account_number.into(),
                display_name: display_name.into(),
                balance: opening_balance,
                approved_recipients,
            },
        );
    }

    /// Current balance for an owner key, if the account exists.
    #[must_use]
    pub fn balance_of(&self, owner_key: &str) -> Option<Amount> {
        self.accounts
            .lock()
            .expect("ledger lock poisoned")
            .get(owner_key)
            .map(|a| a.balance)
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn resolve_account(
        &self,
        owner_key: &str,
    ) -> Result<Option<AccountSnapshot>, LedgerError> {
        let accounts = self.accounts.lock().expect("ledger lock poisoned");
        Ok(accounts.get(owner_key).map(|a| AccountSnapshot {
            account_number: a.account_number.clone(),
            display_name: a.display_name.clone(),
            balance: a.balance,
        }))
    }

    async fn credit(&self, owner_key: &str, amount: Amount) -> Result<Amount, LedgerError> {
        let mut accounts = self.accounts.lock().expect("ledger lock poisoned");
        let account = accounts
            .get_mut(owner_key)
            .ok_or(LedgerError::AccountNotFound)?;
        account.balance = account
            .balance
            .checked_add(amount)
            .ok_or_else(|| LedgerError::Unavailable("balance overflow".to_string()))?;
        Ok(account.balance)
    }

    async fn debit(&self, owner_key: &str, amount: Amount) -> Result<Amount, LedgerError> {
        let mut accounts = self.accounts.lock().expect("ledger lock poisoned");
        let account = accounts
            .get_mut(owner_key)
            .ok_or(LedgerError::AccountNotFound)?;
        if account.balance < amount {
            return Err(LedgerError::InsufficientFunds {
                balance: account.balance,
                requested: amount,
            });
        }
        account.balance = account
            .balance
            .checked_sub(amount)
            .ok_or_else(|| LedgerError::Unavailable("balance underflow".to_string()))?;
        Ok(account.balance)
    }

    async fn approved_recipients(&self, owner_key: &str) -> Result<Vec<String>, LedgerError> {
        let accounts = self.accounts.lock().expect("ledger lock poisoned");
        Ok(accounts
            .get(owner_key)
            .map(|a| a.approved_recipients.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> MemoryLedger {
        let ledger = MemoryLedger::new();
        ledger.upsert_account(
            "guardian-1",
            "1111222233",
            "Alice",
            Amount::from_major(500),
            vec!["9876-5432-10".to_string()],
        );
        ledger
    }

    #[tokio::test]
    async fn test_debit_and_credit_report_new_balance() {
        let ledger = seeded();
        let after_debit = ledger.debit("guardian-1", Amount::from_major(120)).await.unwrap();
        assert_eq!(after_debit, Amount::from_major(380));
        let after_credit = ledger.credit("guardian-1", Amount::from_major(20)).await.unwrap();
        assert_eq!(after_credit, Amount::from_major(400));
    }

    #[tokio::test]
    async fn test_debit_past_balance_fails_without_mutation() {
        let ledger = seeded();
        let err = ledger
            .debit("guardian-1", Amount::from_major(501))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientFunds {
                balance: Amount::from_major(500),
                requested: Amount::from_major(501),
            }
        );
        assert_eq!(ledger.balance_of("guardian-1"), Some(Amount::from_major(500)));
    }

    #[tokio::test]
    async fn test_unknown_owner() {
        let ledger = seeded();
        assert_eq!(ledger.resolve_account("nobody").await.unwrap(), None);
        assert_eq!(
            ledger.credit("nobody", Amount::from_major(1)).await.unwrap_err(),
            LedgerError::AccountNotFound
        );
        assert!(ledger.approved_recipients("nobody").await.unwrap().is_empty());
    }
}
