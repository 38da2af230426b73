//! Action executor and transfer fraud gate.
//!
//! Redemption is a two-phase protocol around the ledger effect:
//!
//! 1. `reserve` a use from the registry (atomic validate-and-increment;
//!    no ledger access happens for an unredeemable token),
//! 2. perform the bound operation against the ledger under a bounded
//!    timeout, with the fraud gate applied to flagged transfers before
//!    any money moves,
//! 3. `commit_use` on success, `release` on any failure.
//!
//! Business failures (unknown account, insufficient funds, fraud block)
//! and redemption failures (not found, expired, exhausted) come back as
//! typed [`ExecuteError`] values; nothing is thrown past this boundary.
//! Infrastructure faults ([`ExecuteError::Unavailable`],
//! [`ExecuteError::Timeout`]) release the reservation so the action is
//! exactly as redeemable as before the attempt. Once money has moved, the
//! commit is always attempted, even if it can only be logged on failure.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use teller_core::{
    ActionId, ActionKind, Amount, FraudPolicy, Ledger, LedgerError, PreConfiguredAction,
    TransactionKind, TransactionRecord,
};

use crate::registry::{ActionRegistry, RedeemError};

/// Default upper bound on a single ledger call.
pub const DEFAULT_LEDGER_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Results
// =============================================================================

/// Successful redemption outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReceipt {
    /// Kind of operation performed.
    pub kind: TransactionKind,
    /// Amount moved, if any.
    pub amount: Option<Amount>,
    /// Balance after the operation (also populated for balance checks).
    pub new_balance: Option<Amount>,
    /// Whether the fraud gate flagged this transfer (approved recipients
    /// still execute; the flag is carried into the audit record).
    pub fraud_flagged: bool,
    /// Audit record for the ledger operation.
    pub transaction: TransactionRecord,
}

/// Typed redemption failure.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ExecuteError {
    /// The token gate refused redemption (not found / expired /
    /// exhausted) or the registry store faulted.
    #[error(transparent)]
    Redeem(#[from] RedeemError),

    /// The owner key resolved no ledger account. No use consumed.
    #[error("no account found for this action's guardian")]
    AccountNotFound,

    /// Balance cannot cover the debit. No use consumed, no money moved.
    #[error("insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds {
        /// Balance at the time of the attempt.
        balance: Amount,
        /// Requested debit.
        requested: Amount,
    },

    /// Flagged transfer to an unapproved recipient. Aborted before any
    /// ledger movement; no use consumed.
    #[error("{message}")]
    FraudBlocked {
        /// Explanation of the allowlist requirement, surfaced to the
        /// kiosk user.
        message: String,
    },

    /// Ledger backend fault. Retryable; no use consumed.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    /// A ledger call exceeded its bounded timeout. Retryable; no use
    /// consumed.
    #[error("ledger call timed out")]
    Timeout,
}

impl ExecuteError {
    /// Stable wire code for this failure.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Redeem(RedeemError::NotFound) => "not_found",
            Self::Redeem(RedeemError::Expired) => "expired",
            Self::Redeem(RedeemError::Exhausted) => "exhausted",
            Self::Redeem(RedeemError::Store(_)) | Self::Unavailable(_) => "unavailable",
            Self::Timeout => "timeout",
            Self::AccountNotFound => "account_not_found",
            Self::InsufficientFunds { .. } => "insufficient_funds",
            Self::FraudBlocked { .. } => "fraud_blocked",
        }
    }

    /// True for the fraud-gate abort, which the wire layer reports with a
    /// dedicated alert flag.
    #[must_use]
    pub const fn is_fraud_alert(&self) -> bool {
        matches!(self, Self::FraudBlocked { .. })
    }
}

// =============================================================================
// ActionExecutor
// =============================================================================

/// Redeems validated actions against the ledger.
///
/// Holds no state of its own; the registry and the ledger are the only
/// shared mutable state.
pub struct ActionExecutor {
    registry: Arc<ActionRegistry>,
    ledger: Arc<dyn Ledger>,
    policy: FraudPolicy,
    ledger_timeout: Duration,
}

impl ActionExecutor {
    /// Builds an executor.
    pub fn new(
        registry: Arc<ActionRegistry>,
        ledger: Arc<dyn Ledger>,
        policy: FraudPolicy,
        ledger_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            ledger,
            policy,
            ledger_timeout,
        }
    }

    /// Redeems the action bound to `id`. See [`Self::execute_at`].
    pub async fn execute(&self, id: &ActionId) -> Result<ExecutionReceipt, ExecuteError> {
        self.execute_at(id, Utc::now()).await
    }

    /// Redeems the action bound to `id`, evaluating expiry against `now`.
    pub async fn execute_at(
        &self,
        id: &ActionId,
        now: DateTime<Utc>,
    ) -> Result<ExecutionReceipt, ExecuteError> {
        let reservation = self.registry.reserve_at(id, now)?;
        let action = reservation.action().clone();

        match self.perform(&action, now).await {
            Ok(receipt) => {
                // Money (or the balance read) already happened; the usage
                // commit must be attempted regardless of what the caller
                // sees. A store fault here is logged, not surfaced.
                if let Err(error) = self.registry.commit_use_at(reservation, now) {
                    tracing::error!(
                        action_id = %id,
                        %error,
                        "ledger effect succeeded but use commit failed"
                    );
                }
                tracing::info!(
                    action_id = %id,
                    kind = ?receipt.kind,
                    fraud_flagged = receipt.fraud_flagged,
                    "action redeemed"
                );
                Ok(receipt)
            },
            Err(error) => {
                if let Err(release_error) = self.registry.release(reservation) {
                    tracing::error!(
                        action_id = %id,
                        %release_error,
                        "failed to release reservation after aborted redemption"
                    );
                }
                tracing::info!(action_id = %id, code = error.code(), "redemption aborted");
                Err(error)
            },
        }
    }

    /// Performs the bound ledger operation. Never touches the registry.
    async fn perform(
        &self,
        action: &PreConfiguredAction,
        now: DateTime<Utc>,
    ) -> Result<ExecutionReceipt, ExecuteError> {
        let owner_key = action.owner_key.as_str();
        let snapshot = self
            .ledger_call(self.ledger.resolve_account(owner_key))
            .await?
            .ok_or(ExecuteError::AccountNotFound)?;

        match &action.kind {
            ActionKind::CheckBalance => Ok(self.receipt(
                action,
                TransactionKind::BalanceCheck,
                None,
                Some(snapshot.balance),
                None,
                false,
                now,
            )),
            ActionKind::Withdraw { amount } => {
                let new_balance = self.debit(owner_key, *amount).await?;
                Ok(self.receipt(
                    action,
                    TransactionKind::Withdraw,
                    Some(*amount),
                    Some(new_balance),
                    None,
                    false,
                    now,
                ))
            },
            ActionKind::Deposit { amount } => {
                let new_balance = self
                    .ledger_call(self.ledger.credit(owner_key, *amount))
                    .await?;
                Ok(self.receipt(
                    action,
                    TransactionKind::Deposit,
                    Some(*amount),
                    Some(new_balance),
                    None,
                    false,
                    now,
                ))
            },
            ActionKind::Transfer { amount, recipient } => {
                let flagged = self.policy.flags(*amount);
                if flagged {
                    let approved = self
                        .ledger_call(self.ledger.approved_recipients(owner_key))
                        .await?;
                    if !self.policy.recipient_approved(&approved, recipient) {
                        return Err(ExecuteError::FraudBlocked {
                            message: format!(
                                "transfer of {amount} exceeds the {} review threshold and \
                                 the recipient is not on the approved list; add the \
                                 recipient as an approved recipient or lower the amount",
                                self.policy.threshold
                            ),
                        });
                    }
                }
                let new_balance = self.debit(owner_key, *amount).await?;
                Ok(self.receipt(
                    action,
                    TransactionKind::Transfer,
                    Some(*amount),
                    Some(new_balance),
                    Some(recipient.clone()),
                    flagged,
                    now,
                ))
            },
        }
    }

    async fn debit(&self, owner_key: &str, amount: Amount) -> Result<Amount, ExecuteError> {
        self.ledger_call(self.ledger.debit(owner_key, amount)).await
    }

    /// Bounds a ledger future with the configured timeout and maps ledger
    /// errors into the executor taxonomy.
    async fn ledger_call<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, LedgerError>> + Send,
    ) -> Result<T, ExecuteError> {
        match tokio::time::timeout(self.ledger_timeout, fut).await {
            Err(_) => Err(ExecuteError::Timeout),
            Ok(Err(LedgerError::AccountNotFound)) => Err(ExecuteError::AccountNotFound),
            Ok(Err(LedgerError::InsufficientFunds { balance, requested })) => {
                Err(ExecuteError::InsufficientFunds { balance, requested })
            },
            Ok(Err(LedgerError::Unavailable(reason))) => Err(ExecuteError::Unavailable(reason)),
            Ok(Err(other)) => Err(ExecuteError::Unavailable(other.to_string())),
            Ok(Ok(value)) => Ok(value),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn receipt(
        &self,
        action: &PreConfiguredAction,
        kind: TransactionKind,
        amount: Option<Amount>,
        new_balance: Option<Amount>,
        recipient: Option<String>,
        fraud_flagged: bool,
        now: DateTime<Utc>,
    ) -> ExecutionReceipt {
        ExecutionReceipt {
            kind,
            amount,
            new_balance,
            fraud_flagged,
            transaction: TransactionRecord {
                kind,
                amount,
                recipient_account_number: recipient,
                balance_after: new_balance,
                description: action.description.clone(),
                fraud_flagged,
                timestamp: now,
            },
        }
    }
}
