//! Action registry: the single owner of the capability-token lifecycle.
//!
//! Every redemption passes through the registry's gate before any ledger
//! access: `validate` for read-only probes, `reserve` for redemption
//! proper. Reservation is an atomic check-and-increment of `current_uses`
//! inside one store update, so two concurrent redemptions of a multi-use
//! action can never push `current_uses` past `max_uses`. The executor
//! then either `commit_use`s the reservation (after the ledger operation
//! succeeded) or `release`s it (fraud block, insufficient funds,
//! unresolvable account, infrastructure fault), restoring the use.
//!
//! The executor never mutates actions directly; everything goes through
//! the operations here.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use teller_core::{ActionId, NewAction, PreConfiguredAction};

use crate::store::{ActionStore, StoreError, UpdateOutcome};

// =============================================================================
// Errors
// =============================================================================

/// Creation failures.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CreateError {
    /// Malformed creation input; nothing was persisted.
    #[error(transparent)]
    Spec(#[from] teller_core::ActionSpecError),

    /// Persistence fault; the action was not created.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Why an action cannot be redeemed right now.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum RedeemError {
    /// No action under that id (never existed, reaped, or deleted).
    #[error("action not found")]
    NotFound,

    /// The action's expiry timestamp has passed. The expired record is
    /// reaped as a side effect of the check.
    #[error("action expired")]
    Expired,

    /// Every permitted use has been consumed.
    #[error("action already used the maximum number of times")]
    Exhausted,

    /// Persistence fault; the action is exactly as redeemable as before.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Deletion failures.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DeleteError {
    /// No action under that id.
    #[error("action not found")]
    NotFound,

    /// The requesting owner key does not own the action.
    #[error("only the creating guardian may delete this action")]
    Forbidden,

    /// Persistence fault; the action is intact.
    #[error(transparent)]
    Store(#[from] StoreError),
}

// =============================================================================
// UseReservation
// =============================================================================

/// A successfully reserved use, produced by [`ActionRegistry::reserve`].
///
/// The holder must resolve it exactly once: [`ActionRegistry::commit_use`]
/// after the ledger effect succeeded, [`ActionRegistry::release`]
/// otherwise. Dropping it without resolving leaks a consumed use.
#[derive(Debug)]
#[must_use = "a reservation must be committed or released"]
pub struct UseReservation {
    id: ActionId,
    /// Snapshot of the action at reservation time (post-increment).
    action: PreConfiguredAction,
}

impl UseReservation {
    /// Id of the reserved action.
    pub fn id(&self) -> &ActionId {
        &self.id
    }

    /// The action as it looked when the use was reserved.
    pub fn action(&self) -> &PreConfiguredAction {
        &self.action
    }
}

// =============================================================================
// ActionRegistry
// =============================================================================

/// Durable, race-free bookkeeping for pre-configured actions.
///
/// All public operations delegate to `_at` variants taking an explicit
/// `now`, which tests use for deterministic clocks.
pub struct ActionRegistry {
    store: Arc<dyn ActionStore>,
}

impl ActionRegistry {
    /// Creates a registry over an injected store.
    pub fn new(store: Arc<dyn ActionStore>) -> Self {
        Self { store }
    }

    /// Mints and persists a new action. See [`Self::create_at`].
    pub fn create(&self, new: &NewAction) -> Result<PreConfiguredAction, CreateError> {
        self.create_at(new, Utc::now())
    }

    /// Mints and persists a new action with `created_at = now`.
    pub fn create_at(
        &self,
        new: &NewAction,
        now: DateTime<Utc>,
    ) -> Result<PreConfiguredAction, CreateError> {
        new.validate()?;
        let action = PreConfiguredAction::from_new(new, now);
        self.store.insert(action.clone())?;
        tracing::debug!(
            action_id = %action.id,
            kind = action.kind.type_name(),
            max_uses = action.max_uses,
            expires_at = %action.expires_at,
            "created pre-configured action"
        );
        Ok(action)
    }

    /// Pure lookup by id. Does not check expiry; redemption paths use
    /// [`Self::validate`] or [`Self::reserve`] for that.
    pub fn get(&self, id: &ActionId) -> Result<Option<PreConfiguredAction>, StoreError> {
        self.store.get(id)
    }

    /// Read-only redeemability probe. See [`Self::validate_at`].
    pub fn validate(&self, id: &ActionId) -> Result<PreConfiguredAction, RedeemError> {
        self.validate_at(id, Utc::now())
    }

    /// Checks whether the action is redeemable at `now` without consuming
    /// a use. An expired entry is reaped as a side effect.
    pub fn validate_at(
        &self,
        id: &ActionId,
        now: DateTime<Utc>,
    ) -> Result<PreConfiguredAction, RedeemError> {
        let Some(action) = self.store.get(id)? else {
            return Err(RedeemError::NotFound);
        };
        if action.is_expired(now) {
            self.store.remove(id)?;
            return Err(RedeemError::Expired);
        }
        if action.is_exhausted() {
            return Err(RedeemError::Exhausted);
        }
        Ok(action)
    }

    /// Reserves one use. See [`Self::reserve_at`].
    pub fn reserve(&self, id: &ActionId) -> Result<UseReservation, RedeemError> {
        self.reserve_at(id, Utc::now())
    }

    /// Atomically validates and consumes one use at `now`.
    ///
    /// The check and the `current_uses` increment happen inside a single
    /// store update, so overlapping reservations serialize and the
    /// `current_uses <= max_uses` invariant holds.
    pub fn reserve_at(
        &self,
        id: &ActionId,
        now: DateTime<Utc>,
    ) -> Result<UseReservation, RedeemError> {
        let outcome = self.store.update(id, &mut |action| {
            if action.is_redeemable(now) {
                action.current_uses += 1;
                true
            } else {
                false
            }
        })?;
        match outcome {
            UpdateOutcome::Missing => Err(RedeemError::NotFound),
            UpdateOutcome::Unchanged(action) => {
                if action.is_expired(now) {
                    self.store.remove(id)?;
                    Err(RedeemError::Expired)
                } else {
                    Err(RedeemError::Exhausted)
                }
            },
            UpdateOutcome::Updated(action) => Ok(UseReservation {
                id: id.clone(),
                action,
            }),
        }
    }

    /// Finalizes a reservation after the ledger effect succeeded: stamps
    /// `used_at` on first use and `last_used_at` always.
    ///
    /// Safe to retry: re-stamping timestamps is idempotent with respect
    /// to the use count, which was already consumed at reservation time.
    pub fn commit_use(&self, reservation: UseReservation) -> Result<(), StoreError> {
        self.commit_use_at(reservation, Utc::now())
    }

    /// [`Self::commit_use`] with an explicit timestamp.
    pub fn commit_use_at(
        &self,
        reservation: UseReservation,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let outcome = self.store.update(reservation.id(), &mut |action| {
            action.used_at.get_or_insert(now);
            action.last_used_at = Some(now);
            true
        })?;
        if matches!(outcome, UpdateOutcome::Missing) {
            // Deleted between reserve and commit; the use itself already
            // happened, so there is nothing left to record.
            tracing::warn!(action_id = %reservation.id(), "action vanished before use commit");
        }
        Ok(())
    }

    /// Rolls back a reservation whose ledger effect did not happen,
    /// restoring the consumed use.
    pub fn release(&self, reservation: UseReservation) -> Result<(), StoreError> {
        let outcome = self.store.update(reservation.id(), &mut |action| {
            action.current_uses = action.current_uses.saturating_sub(1);
            true
        })?;
        if matches!(outcome, UpdateOutcome::Missing) {
            tracing::warn!(action_id = %reservation.id(), "action vanished before reservation release");
        }
        Ok(())
    }

    /// Lists the owner's non-expired actions. See
    /// [`Self::list_by_owner_at`].
    pub fn list_by_owner(&self, owner_key: &str) -> Result<Vec<PreConfiguredAction>, StoreError> {
        self.list_by_owner_at(owner_key, Utc::now())
    }

    /// Lists the owner's non-expired actions, opportunistically reaping
    /// the owner's expired entries encountered during the scan.
    pub fn list_by_owner_at(
        &self,
        owner_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<PreConfiguredAction>, StoreError> {
        let reaped = self
            .store
            .remove_where(&mut |a| a.owner_key == owner_key && a.is_expired(now))?;
        if !reaped.is_empty() {
            tracing::debug!(count = reaped.len(), "reaped expired actions during listing");
        }

        let mut actions = Vec::new();
        self.store.scan(&mut |a| {
            if a.owner_key == owner_key && !a.is_expired(now) {
                actions.push(a.clone());
            }
        })?;
        actions.sort_by_key(|a| a.created_at);
        Ok(actions)
    }

    /// Deletes an action on behalf of `requesting_owner`.
    ///
    /// # Errors
    ///
    /// [`DeleteError::Forbidden`] when the requester is not the creating
    /// guardian; the action is left intact.
    pub fn delete(&self, id: &ActionId, requesting_owner: &str) -> Result<(), DeleteError> {
        let Some(action) = self.store.get(id)? else {
            return Err(DeleteError::NotFound);
        };
        if action.owner_key != requesting_owner {
            return Err(DeleteError::Forbidden);
        }
        self.store.remove(id)?;
        tracing::debug!(action_id = %id, "action deleted by owner");
        Ok(())
    }

    /// Removes every action whose expiry has passed, returning the count.
    /// Safe to run concurrently with any other operation.
    pub fn sweep_expired_at(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let removed = self.store.remove_where(&mut |a| a.is_expired(now))?;
        Ok(removed.len())
    }
}
