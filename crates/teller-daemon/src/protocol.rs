//! JSON wire protocol: request/response DTOs and the dispatcher.
//!
//! The HTTP/UI layer in front of this daemon is deliberately thin; these
//! messages are the whole contract it relays. One request maps to one
//! registry/executor operation:
//!
//! - `create_action` — guardian mints a token (authenticated boundary)
//! - `execute_action` — kiosk redeems a token (intentionally
//!   unauthenticated; the id is the capability)
//! - `validate_action` — kiosk pre-flight probe; response is redacted,
//!   never exposing the owner key or raw account identifiers
//! - `list_actions` / `delete_action` — guardian management, owner-key
//!   checked
//!
//! Failures carry stable machine codes (`not_found`, `expired`,
//! `exhausted`, `account_not_found`, `insufficient_funds`,
//! `fraud_blocked`, `invalid_request`, `unavailable`, `timeout`) so the
//! kiosk can branch without parsing prose.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use teller_core::{
    ActionId, ActionKind, Amount, NewAction, PreConfiguredAction, TransactionRecord,
};

use crate::executor::ActionExecutor;
use crate::metrics::TellerMetrics;
use crate::registry::{ActionRegistry, CreateError, DeleteError, RedeemError};

// =============================================================================
// Requests
// =============================================================================

/// Wire tag for the four action kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionTypeTag {
    /// Withdraw cash.
    Withdraw,
    /// Deposit cash.
    Deposit,
    /// Transfer to another account.
    Transfer,
    /// Balance read.
    CheckBalance,
}

/// Guardian request to mint an action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateActionRequest {
    /// Identity string resolving the guardian's ledger account.
    pub owner_key: String,
    /// Presentation-only masked card number.
    #[serde(default)]
    pub display_card_number: Option<String>,
    /// Presentation-only guardian name.
    #[serde(default)]
    pub display_name: Option<String>,
    /// Which operation to pre-authorize.
    pub action_type: ActionTypeTag,
    /// Amount for withdraw/deposit/transfer.
    #[serde(default)]
    pub amount: Option<Amount>,
    /// Recipient for transfers.
    #[serde(default)]
    pub recipient_account_number: Option<String>,
    /// Free-text description shown at the kiosk.
    #[serde(default)]
    pub description: Option<String>,
    /// Usage cap; defaults to 1.
    #[serde(default)]
    pub max_uses: Option<u32>,
    /// Days until expiry; defaults to 7. Non-positive values fall back to
    /// the default.
    #[serde(default)]
    pub expiry_days: Option<i64>,
}

/// A protocol request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    /// Mint a new action.
    CreateAction(CreateActionRequest),
    /// Redeem an action by id.
    ExecuteAction {
        /// The capability id.
        action_id: String,
    },
    /// Probe an action's redeemability without consuming a use.
    ValidateAction {
        /// The capability id.
        action_id: String,
    },
    /// List the caller's non-expired actions.
    ListActions {
        /// Owner key of the requesting guardian.
        owner_key: String,
    },
    /// Delete an action the caller owns.
    DeleteAction {
        /// The capability id.
        action_id: String,
        /// Owner key of the requesting guardian.
        owner_key: String,
    },
}

// =============================================================================
// Responses
// =============================================================================

/// Created-action payload echoed back to the guardian.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedAction {
    /// Wire name of the bound operation.
    #[serde(rename = "type")]
    pub action_type: String,
    /// Bound amount, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<Amount>,
    /// Description.
    pub description: String,
    /// Usage cap.
    pub max_uses: u32,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Expiry timestamp.
    pub expires_at: DateTime<Utc>,
}

/// Response to `create_action`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateActionResponse {
    /// Always `true`; failures use [`ErrorResponse`].
    pub success: bool,
    /// The minted capability id — the only credential needed to redeem.
    pub action_id: String,
    /// Echo of the created action.
    pub action: CreatedAction,
}

/// Response to `execute_action`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteActionResponse {
    /// Whether the bound operation executed.
    pub success: bool,
    /// Failure code when `success` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Human-readable failure detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Balance after the operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_balance: Option<Amount>,
    /// Set when the fraud gate was involved: `true` on a fraud block, and
    /// also `true` on a flagged-but-approved transfer that executed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fraud_alert: Option<bool>,
    /// Explanation of the allowlist requirement on a fraud block.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fraud_message: Option<String>,
    /// Audit record for the executed operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<TransactionRecord>,
}

/// Redacted action summary for the kiosk pre-flight probe. Never carries
/// the owner key or raw account identifiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionSummary {
    /// Wire name of the bound operation.
    #[serde(rename = "type")]
    pub action_type: String,
    /// Bound amount, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<Amount>,
    /// Description.
    pub description: String,
    /// Guardian display name, if one was set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guardian_name: Option<String>,
    /// Usage cap.
    pub max_uses: u32,
    /// Uses consumed so far.
    pub current_uses: u32,
    /// Expiry timestamp.
    pub expires_at: DateTime<Utc>,
}

/// Response to `validate_action`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateActionResponse {
    /// Whether the action is currently redeemable.
    pub valid: bool,
    /// Failure code when not redeemable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Redacted summary when redeemable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<ActionSummary>,
}

/// One entry in the owner's listing. The owner sees their own ids and
/// recipients; this is not the redacted kiosk view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnedAction {
    /// Capability id (needed to render the QR).
    pub action_id: String,
    /// Wire name of the bound operation.
    #[serde(rename = "type")]
    pub action_type: String,
    /// Bound amount, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<Amount>,
    /// Transfer recipient, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient_account_number: Option<String>,
    /// Description.
    pub description: String,
    /// Usage cap.
    pub max_uses: u32,
    /// Uses consumed so far.
    pub current_uses: u32,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Expiry timestamp.
    pub expires_at: DateTime<Utc>,
    /// Most recent successful use.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Response to `list_actions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListActionsResponse {
    /// Always `true`; failures use [`ErrorResponse`].
    pub success: bool,
    /// The owner's non-expired actions, oldest first.
    pub actions: Vec<OwnedAction>,
}

/// Response to `delete_action`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteActionResponse {
    /// Whether the action was deleted.
    pub success: bool,
}

/// Generic failure envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Always `false`.
    pub success: bool,
    /// Stable machine code.
    pub error: String,
    /// Human-readable detail.
    pub message: String,
}

impl ErrorResponse {
    /// Builds a failure envelope.
    #[must_use]
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            message: message.into(),
        }
    }
}

/// A protocol response.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Response {
    /// Successful creation.
    Create(CreateActionResponse),
    /// Execution outcome (success or typed failure).
    Execute(ExecuteActionResponse),
    /// Validation probe outcome.
    Validate(ValidateActionResponse),
    /// Owner listing.
    List(ListActionsResponse),
    /// Deletion outcome.
    Delete(DeleteActionResponse),
    /// Request-level failure.
    Error(ErrorResponse),
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Maps protocol requests onto the registry and executor.
pub struct Dispatcher {
    registry: Arc<ActionRegistry>,
    executor: Arc<ActionExecutor>,
    metrics: Option<Arc<TellerMetrics>>,
}

impl Dispatcher {
    /// Builds a dispatcher.
    pub fn new(
        registry: Arc<ActionRegistry>,
        executor: Arc<ActionExecutor>,
        metrics: Option<Arc<TellerMetrics>>,
    ) -> Self {
        Self {
            registry,
            executor,
            metrics,
        }
    }

    /// Handles one request.
    pub async fn handle(&self, request: Request) -> Response {
        match request {
            Request::CreateAction(create) => self.create_action(create),
            Request::ExecuteAction { action_id } => {
                self.execute_action(&ActionId::from_string(action_id)).await
            },
            Request::ValidateAction { action_id } => {
                self.validate_action(&ActionId::from_string(action_id))
            },
            Request::ListActions { owner_key } => self.list_actions(&owner_key),
            Request::DeleteAction {
                action_id,
                owner_key,
            } => self.delete_action(&ActionId::from_string(action_id), &owner_key),
        }
    }

    fn create_action(&self, request: CreateActionRequest) -> Response {
        let new = match build_new_action(request) {
            Ok(new) => new,
            Err(message) => return Response::Error(ErrorResponse::new("invalid_request", message)),
        };
        match self.registry.create(&new) {
            Ok(action) => {
                if let Some(metrics) = &self.metrics {
                    metrics.action_created();
                }
                Response::Create(CreateActionResponse {
                    success: true,
                    action_id: action.id.to_string(),
                    action: CreatedAction {
                        action_type: action.kind.type_name().to_string(),
                        amount: action.kind.amount(),
                        description: action.description.clone(),
                        max_uses: action.max_uses,
                        created_at: action.created_at,
                        expires_at: action.expires_at,
                    },
                })
            },
            Err(CreateError::Spec(spec)) => {
                Response::Error(ErrorResponse::new("invalid_request", spec.to_string()))
            },
            Err(CreateError::Store(error)) => {
                tracing::error!(%error, "action creation failed in store");
                Response::Error(ErrorResponse::new("unavailable", "storage unavailable"))
            },
        }
    }

    async fn execute_action(&self, id: &ActionId) -> Response {
        let result = self.executor.execute(id).await;
        if let Some(metrics) = &self.metrics {
            match &result {
                Ok(_) => metrics.redemption("success"),
                Err(error) => {
                    metrics.redemption(error.code());
                    if error.is_fraud_alert() {
                        metrics.fraud_blocked();
                    }
                },
            }
        }
        match result {
            Ok(receipt) => Response::Execute(ExecuteActionResponse {
                success: true,
                error: None,
                message: None,
                new_balance: receipt.new_balance,
                fraud_alert: receipt.fraud_flagged.then_some(true),
                fraud_message: None,
                transaction: Some(receipt.transaction),
            }),
            Err(error) => {
                let fraud = error.is_fraud_alert();
                Response::Execute(ExecuteActionResponse {
                    success: false,
                    error: Some(error.code().to_string()),
                    message: Some(error.to_string()),
                    new_balance: None,
                    fraud_alert: fraud.then_some(true),
                    fraud_message: fraud.then(|| error.to_string()),
                    transaction: None,
                })
            },
        }
    }

    fn validate_action(&self, id: &ActionId) -> Response {
        match self.registry.validate(id) {
            Ok(action) => Response::Validate(ValidateActionResponse {
                valid: true,
                error: None,
                action: Some(summarize(&action)),
            }),
            Err(error) => Response::Validate(ValidateActionResponse {
                valid: false,
                error: Some(redeem_error_code(&error).to_string()),
                action: None,
            }),
        }
    }

    fn list_actions(&self, owner_key: &str) -> Response {
        match self.registry.list_by_owner(owner_key) {
            Ok(actions) => Response::List(ListActionsResponse {
                success: true,
                actions: actions.iter().map(owned_view).collect(),
            }),
            Err(error) => {
                tracing::error!(%error, "listing failed in store");
                Response::Error(ErrorResponse::new("unavailable", "storage unavailable"))
            },
        }
    }

    fn delete_action(&self, id: &ActionId, owner_key: &str) -> Response {
        match self.registry.delete(id, owner_key) {
            Ok(()) => Response::Delete(DeleteActionResponse { success: true }),
            Err(DeleteError::NotFound) => {
                Response::Error(ErrorResponse::new("not_found", "action not found"))
            },
            Err(DeleteError::Forbidden) => Response::Error(ErrorResponse::new(
                "forbidden",
                "only the creating guardian may delete this action",
            )),
            Err(DeleteError::Store(error)) => {
                tracing::error!(%error, "deletion failed in store");
                Response::Error(ErrorResponse::new("unavailable", "storage unavailable"))
            },
        }
    }
}

fn redeem_error_code(error: &RedeemError) -> &'static str {
    match error {
        RedeemError::NotFound => "not_found",
        RedeemError::Expired => "expired",
        RedeemError::Exhausted => "exhausted",
        RedeemError::Store(_) => "unavailable",
    }
}

/// Converts a creation request into validated-ready [`NewAction`]
/// parameters, checking the per-kind field requirements.
fn build_new_action(request: CreateActionRequest) -> Result<NewAction, String> {
    let amount = |field: &str| -> Result<Amount, String> {
        request
            .amount
            .ok_or_else(|| format!("amount is required for {field}"))
    };
    let kind = match request.action_type {
        ActionTypeTag::Withdraw => ActionKind::Withdraw {
            amount: amount("WITHDRAW")?,
        },
        ActionTypeTag::Deposit => ActionKind::Deposit {
            amount: amount("DEPOSIT")?,
        },
        ActionTypeTag::Transfer => ActionKind::Transfer {
            amount: amount("TRANSFER")?,
            recipient: request
                .recipient_account_number
                .clone()
                .ok_or_else(|| "recipient_account_number is required for TRANSFER".to_string())?,
        },
        ActionTypeTag::CheckBalance => ActionKind::CheckBalance,
    };
    Ok(NewAction {
        owner_key: request.owner_key,
        display_card_number: request.display_card_number,
        display_name: request.display_name,
        kind,
        description: request.description.unwrap_or_default(),
        max_uses: request.max_uses,
        ttl: request
            .expiry_days
            .filter(|days| *days > 0)
            .map(chrono::Duration::days),
    })
}

fn summarize(action: &PreConfiguredAction) -> ActionSummary {
    ActionSummary {
        action_type: action.kind.type_name().to_string(),
        amount: action.kind.amount(),
        description: action.description.clone(),
        guardian_name: action.display_name.clone(),
        max_uses: action.max_uses,
        current_uses: action.current_uses,
        expires_at: action.expires_at,
    }
}

fn owned_view(action: &PreConfiguredAction) -> OwnedAction {
    let recipient = match &action.kind {
        ActionKind::Transfer { recipient, .. } => Some(recipient.clone()),
        _ => None,
    };
    OwnedAction {
        action_id: action.id.to_string(),
        action_type: action.kind.type_name().to_string(),
        amount: action.kind.amount(),
        recipient_account_number: recipient,
        description: action.description.clone(),
        max_uses: action.max_uses,
        current_uses: action.current_uses,
        created_at: action.created_at,
        expires_at: action.expires_at,
        last_used_at: action.last_used_at,
    }
}
