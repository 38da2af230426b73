//! Pre-configured action capability records.
//!
//! A [`PreConfiguredAction`] binds one financial operation to an opaque,
//! unguessable id. Whoever holds the id may attempt redemption, so the id
//! is minted from the OS entropy source with 256 bits of entropy — it is a
//! capability credential first and a lookup key second.
//!
//! Lifecycle: created by a guardian, redeemed zero or more times (each
//! redemption increments `current_uses`), then terminal by expiry
//! (time-based) or exhaustion (`current_uses == max_uses`). Terminal
//! records stay retrievable for audit but are never redeemable again.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::money::Amount;

/// Default usage cap for a new action.
pub const DEFAULT_MAX_USES: u32 = 1;

/// Default time-to-live for a new action.
pub const DEFAULT_TTL_DAYS: i64 = 7;

// =============================================================================
// ActionId
// =============================================================================

/// Opaque capability id: 32 bytes from the OS CSPRNG, hex-encoded.
///
/// Globally unique and never reused. Possession of the id is the entire
/// redemption credential, which is why the entropy floor is an invariant
/// rather than a convenience.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(String);

impl ActionId {
    /// Mints a fresh id from the OS entropy source.
    #[must_use]
    pub fn mint() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    /// Wraps an id received on the wire.
    #[must_use]
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// ActionKind
// =============================================================================

/// The closed set of operations an action can pre-authorize.
///
/// Dispatch is exhaustive matching; adding a variant is a compile error
/// at every match site until it is handled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    /// Withdraw cash from the guardian's account.
    Withdraw {
        /// Amount to withdraw; must be strictly positive.
        amount: Amount,
    },
    /// Deposit cash into the guardian's account.
    Deposit {
        /// Amount to deposit; must be strictly positive.
        amount: Amount,
    },
    /// Transfer money to another account.
    Transfer {
        /// Amount to transfer; must be strictly positive.
        amount: Amount,
        /// Recipient account number as entered by the guardian. Compared
        /// against the approved-recipient list in digits-only form at
        /// redemption time.
        recipient: String,
    },
    /// Read the current balance without moving money.
    CheckBalance,
}

impl ActionKind {
    /// The bound amount, if this kind carries one.
    #[must_use]
    pub const fn amount(&self) -> Option<Amount> {
        match self {
            Self::Withdraw { amount } | Self::Deposit { amount } => Some(*amount),
            Self::Transfer { amount, .. } => Some(*amount),
            Self::CheckBalance => None,
        }
    }

    /// Stable wire name for this kind.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Withdraw { .. } => "WITHDRAW",
            Self::Deposit { .. } => "DEPOSIT",
            Self::Transfer { .. } => "TRANSFER",
            Self::CheckBalance => "CHECK_BALANCE",
        }
    }
}

// =============================================================================
// Validation
// =============================================================================

/// Malformed creation input. Reported synchronously; no state changes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ActionSpecError {
    /// The owner key resolving the ledger account was empty.
    #[error("owner key must not be empty")]
    EmptyOwnerKey,

    /// Withdraw/deposit/transfer amount was zero.
    #[error("{kind} amount must be greater than zero")]
    AmountNotPositive {
        /// Wire name of the offending kind.
        kind: &'static str,
    },

    /// Transfer created without a recipient account number.
    #[error("transfer requires a recipient account number")]
    MissingRecipient,
}

/// Parameters for creating an action, before the registry stamps identity
/// and timestamps onto it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAction {
    /// Identity string used to resolve the ledger account to operate on.
    /// Opaque to the registry; passed through from creation.
    pub owner_key: String,
    /// Presentation-only masked card number. Never used for authorization.
    pub display_card_number: Option<String>,
    /// Presentation-only guardian name. Never used for authorization.
    pub display_name: Option<String>,
    /// The operation this action pre-authorizes.
    pub kind: ActionKind,
    /// Free-text description shown to the redeeming kiosk user.
    pub description: String,
    /// Usage cap; `None` means [`DEFAULT_MAX_USES`].
    pub max_uses: Option<u32>,
    /// Time-to-live; `None` means [`DEFAULT_TTL_DAYS`]. A non-positive
    /// value is honored as-is and yields an already-expired action, which
    /// `validate` reports as expired on first probe.
    pub ttl: Option<Duration>,
}

impl NewAction {
    /// Checks the creation constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ActionSpecError`] for an empty owner key, a non-positive
    /// amount, or a transfer without a recipient.
    pub fn validate(&self) -> Result<(), ActionSpecError> {
        if self.owner_key.trim().is_empty() {
            return Err(ActionSpecError::EmptyOwnerKey);
        }
        if let Some(amount) = self.kind.amount() {
            if !amount.is_positive() {
                return Err(ActionSpecError::AmountNotPositive {
                    kind: self.kind.type_name(),
                });
            }
        }
        if let ActionKind::Transfer { recipient, .. } = &self.kind {
            if recipient.trim().is_empty() {
                return Err(ActionSpecError::MissingRecipient);
            }
        }
        Ok(())
    }

    /// Effective usage cap after defaulting. A zero cap is treated as
    /// unset.
    #[must_use]
    pub fn effective_max_uses(&self) -> u32 {
        match self.max_uses {
            Some(n) if n > 0 => n,
            _ => DEFAULT_MAX_USES,
        }
    }

    /// Effective time-to-live after defaulting.
    #[must_use]
    pub fn effective_ttl(&self) -> Duration {
        self.ttl.unwrap_or_else(|| Duration::days(DEFAULT_TTL_DAYS))
    }
}

// =============================================================================
// PreConfiguredAction
// =============================================================================

/// A stored capability token for one pre-authorized financial operation.
///
/// Invariant: `current_uses <= max_uses` at rest. The registry's reserve
/// path increments `current_uses` atomically under the store lock, so the
/// invariant holds even across concurrent redemptions of a multi-use
/// action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreConfiguredAction {
    /// Capability id; also the storage key.
    pub id: ActionId,
    /// Identity string resolving the guardian's ledger account.
    pub owner_key: String,
    /// Presentation-only masked card number.
    #[serde(default)]
    pub display_card_number: Option<String>,
    /// Presentation-only guardian name.
    #[serde(default)]
    pub display_name: Option<String>,
    /// The bound operation.
    pub kind: ActionKind,
    /// Free-text description.
    #[serde(default)]
    pub description: String,
    /// Usage cap; positive.
    pub max_uses: u32,
    /// Successful redemptions so far. Monotonic.
    pub current_uses: u32,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Expiry timestamp: `created_at + ttl`.
    pub expires_at: DateTime<Utc>,
    /// Timestamp of the first successful use.
    #[serde(default)]
    pub used_at: Option<DateTime<Utc>>,
    /// Timestamp of the most recent successful use.
    #[serde(default)]
    pub last_used_at: Option<DateTime<Utc>>,
}

impl PreConfiguredAction {
    /// Builds a record from validated creation parameters, minting a fresh
    /// id and stamping `created_at`/`expires_at` from `now`.
    #[must_use]
    pub fn from_new(new: &NewAction, now: DateTime<Utc>) -> Self {
        Self {
            id: ActionId::mint(),
            owner_key: new.owner_key.clone(),
            display_card_number: new.display_card_number.clone(),
            display_name: new.display_name.clone(),
            kind: new.kind.clone(),
            description: new.description.clone(),
            max_uses: new.effective_max_uses(),
            current_uses: 0,
            created_at: now,
            expires_at: now + new.effective_ttl(),
            used_at: None,
            last_used_at: None,
        }
    }

    /// True once the expiry timestamp has passed.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// True once every permitted use has been consumed.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.current_uses >= self.max_uses
    }

    /// Redeemable iff not expired and not exhausted.
    #[must_use]
    pub fn is_redeemable(&self, now: DateTime<Utc>) -> bool {
        !self.is_expired(now) && !self.is_exhausted()
    }

    /// Uses still available.
    #[must_use]
    pub const fn remaining_uses(&self) -> u32 {
        self.max_uses.saturating_sub(self.current_uses)
    }
}
