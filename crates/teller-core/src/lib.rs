//! Domain types for guardian pre-configured ATM actions.
//!
//! A *guardian* (an authenticated account owner) mints a capability token
//! that pre-authorizes exactly one kind of financial operation — withdraw,
//! deposit, transfer, or balance check — under explicit constraints
//! (amount, recipient, usage cap, expiry). The token id is the only
//! credential needed to redeem it later, typically from an unauthenticated
//! kiosk scanning a QR code.
//!
//! This crate holds the pure domain model shared by the service crate:
//!
//! - [`money::Amount`] — exact fixed-point money (2 fraction digits)
//! - [`action`] — the [`action::PreConfiguredAction`] record and its
//!   closed [`action::ActionKind`] variant set
//! - [`policy`] — recipient normalization and the transfer fraud
//!   threshold gate
//! - [`ledger`] — the [`ledger::Ledger`] collaborator seam plus an
//!   in-memory implementation for tests and demo wiring
//!
//! No I/O happens here; persistence and execution live in `teller-daemon`.

pub mod action;
pub mod ledger;
pub mod money;
pub mod policy;

pub use action::{ActionId, ActionKind, ActionSpecError, NewAction, PreConfiguredAction};
pub use ledger::{
    AccountSnapshot, Ledger, LedgerError, MemoryLedger, TransactionKind, TransactionRecord,
};
pub use money::Amount;
pub use policy::{normalize_account_number, FraudPolicy};
