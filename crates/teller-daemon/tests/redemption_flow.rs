//! End-to-end redemption flows: registry + executor + fraud gate over a
//! durable store and an in-memory ledger.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use teller_core::{
    AccountSnapshot, ActionKind, Amount, FraudPolicy, Ledger, LedgerError, MemoryLedger,
    NewAction, TransactionKind,
};
use teller_daemon::executor::{ActionExecutor, ExecuteError};
use teller_daemon::protocol::{ActionTypeTag, CreateActionRequest, Dispatcher, Request, Response};
use teller_daemon::registry::{ActionRegistry, RedeemError};
use teller_daemon::store::FileBackedActionStore;

struct Harness {
    _dir: tempfile::TempDir,
    registry: Arc<ActionRegistry>,
    ledger: Arc<MemoryLedger>,
    executor: ActionExecutor,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store =
        FileBackedActionStore::open(dir.path().join("actions.json"), Utc::now()).unwrap();
    let registry = Arc::new(ActionRegistry::new(Arc::new(store)));

    let ledger = Arc::new(MemoryLedger::new());
    ledger.upsert_account(
        "guardian-1",
        "1111222233",
        "Alice",
        Amount::from_major(1000),
        vec!["9876-5432-10".to_string()],
    );

    let executor = ActionExecutor::new(
        Arc::clone(&registry),
        Arc::clone(&ledger) as Arc<dyn teller_core::Ledger>,
        FraudPolicy::default(),
        Duration::from_secs(5),
    );
    Harness {
        _dir: dir,
        registry,
        ledger,
        executor,
    }
}

fn new_action(kind: ActionKind) -> NewAction {
    NewAction {
        owner_key: "guardian-1".to_string(),
        display_card_number: Some("**** 2233".to_string()),
        display_name: Some("Alice".to_string()),
        kind,
        description: "assisted transaction".to_string(),
        max_uses: None,
        ttl: None,
    }
}

#[tokio::test]
async fn single_use_withdraw_executes_once_then_exhausts() {
    let h = harness();
    let action = h
        .registry
        .create(&new_action(ActionKind::Withdraw {
            amount: Amount::from_major(100),
        }))
        .unwrap();

    let receipt = h.executor.execute(&action.id).await.unwrap();
    assert_eq!(receipt.kind, TransactionKind::Withdraw);
    assert_eq!(receipt.new_balance, Some(Amount::from_major(900)));
    assert_eq!(receipt.transaction.balance_after, Some(Amount::from_major(900)));
    assert_eq!(h.ledger.balance_of("guardian-1"), Some(Amount::from_major(900)));

    let second = h.executor.execute(&action.id).await.unwrap_err();
    assert!(matches!(
        second,
        ExecuteError::Redeem(RedeemError::Exhausted)
    ));
    assert_eq!(h.ledger.balance_of("guardian-1"), Some(Amount::from_major(900)));
}

#[tokio::test]
async fn transfer_at_threshold_is_not_flagged() {
    let h = harness();
    // 300.00 to a recipient who is NOT approved: the strict threshold
    // means no flag, so the transfer goes through.
    let action = h
        .registry
        .create(&new_action(ActionKind::Transfer {
            amount: Amount::from_major(300),
            recipient: "555-000-111".to_string(),
        }))
        .unwrap();

    let receipt = h.executor.execute(&action.id).await.unwrap();
    assert!(!receipt.fraud_flagged);
    assert_eq!(receipt.new_balance, Some(Amount::from_major(700)));
}

#[tokio::test]
async fn flagged_transfer_to_approved_recipient_succeeds() {
    let h = harness();
    let action = h
        .registry
        .create(&new_action(ActionKind::Transfer {
            amount: Amount::from_cents(30001),
            recipient: "987654 3210".to_string(), // normalizes to approved entry
        }))
        .unwrap();

    let receipt = h.executor.execute(&action.id).await.unwrap();
    assert!(receipt.fraud_flagged);
    assert!(receipt.transaction.fraud_flagged);
    assert_eq!(receipt.new_balance, Some(Amount::from_cents(100_000 - 30001)));

    // The use was consumed.
    assert!(matches!(
        h.registry.validate(&action.id),
        Err(RedeemError::Exhausted)
    ));
}

#[tokio::test]
async fn flagged_transfer_to_unapproved_recipient_is_blocked_and_not_consumed() {
    let h = harness();
    let action = h
        .registry
        .create(&new_action(ActionKind::Transfer {
            amount: Amount::from_cents(30001),
            recipient: "555-000-111".to_string(),
        }))
        .unwrap();

    let error = h.executor.execute(&action.id).await.unwrap_err();
    assert!(matches!(error, ExecuteError::FraudBlocked { .. }));
    assert_eq!(error.code(), "fraud_blocked");

    // No money moved and the single use is still available, so the
    // guardian can approve the recipient and the kiosk can retry.
    assert_eq!(h.ledger.balance_of("guardian-1"), Some(Amount::from_major(1000)));
    let still_valid = h.registry.validate(&action.id).unwrap();
    assert_eq!(still_valid.current_uses, 0);
}

#[tokio::test]
async fn insufficient_funds_consumes_nothing() {
    let h = harness();
    let action = h
        .registry
        .create(&new_action(ActionKind::Withdraw {
            amount: Amount::from_major(2000),
        }))
        .unwrap();

    let error = h.executor.execute(&action.id).await.unwrap_err();
    assert!(matches!(
        error,
        ExecuteError::InsufficientFunds {
            balance,
            requested,
        } if balance == Amount::from_major(1000) && requested == Amount::from_major(2000)
    ));
    assert_eq!(h.ledger.balance_of("guardian-1"), Some(Amount::from_major(1000)));
    assert_eq!(h.registry.validate(&action.id).unwrap().current_uses, 0);
}

#[tokio::test]
async fn balance_check_reads_without_moving_money_and_exhausts() {
    let h = harness();
    let action = h
        .registry
        .create(&new_action(ActionKind::CheckBalance))
        .unwrap();

    let receipt = h.executor.execute(&action.id).await.unwrap();
    assert_eq!(receipt.kind, TransactionKind::BalanceCheck);
    assert_eq!(receipt.new_balance, Some(Amount::from_major(1000)));
    assert_eq!(receipt.amount, None);
    assert_eq!(h.ledger.balance_of("guardian-1"), Some(Amount::from_major(1000)));

    assert!(matches!(
        h.registry.validate(&action.id),
        Err(RedeemError::Exhausted)
    ));
}

#[tokio::test]
async fn unknown_owner_fails_without_consuming() {
    let h = harness();
    let mut params = new_action(ActionKind::CheckBalance);
    params.owner_key = "nobody".to_string();
    let action = h.registry.create(&params).unwrap();

    let error = h.executor.execute(&action.id).await.unwrap_err();
    assert!(matches!(error, ExecuteError::AccountNotFound));
    assert_eq!(h.registry.validate(&action.id).unwrap().current_uses, 0);
}

#[tokio::test]
async fn multi_use_action_allows_exactly_max_uses_executions() {
    let h = harness();
    let mut params = new_action(ActionKind::Deposit {
        amount: Amount::from_major(10),
    });
    params.max_uses = Some(3);
    let action = h.registry.create(&params).unwrap();

    for _ in 0..3 {
        h.executor.execute(&action.id).await.unwrap();
    }
    let error = h.executor.execute(&action.id).await.unwrap_err();
    assert!(matches!(
        error,
        ExecuteError::Redeem(RedeemError::Exhausted)
    ));
    assert_eq!(h.ledger.balance_of("guardian-1"), Some(Amount::from_major(1030)));

    let stored = h.registry.get(&action.id).unwrap().unwrap();
    assert_eq!(stored.current_uses, 3);
    assert!(stored.used_at.is_some());
    assert!(stored.last_used_at >= stored.used_at);
}

#[tokio::test]
async fn dispatcher_round_trip_create_validate_execute() {
    let h = harness();
    let executor = Arc::new(ActionExecutor::new(
        Arc::clone(&h.registry),
        Arc::clone(&h.ledger) as Arc<dyn teller_core::Ledger>,
        FraudPolicy::default(),
        Duration::from_secs(5),
    ));
    let dispatcher = Dispatcher::new(Arc::clone(&h.registry), executor, None);

    let created = dispatcher
        .handle(Request::CreateAction(CreateActionRequest {
            owner_key: "guardian-1".to_string(),
            display_card_number: None,
            display_name: Some("Alice".to_string()),
            action_type: ActionTypeTag::Withdraw,
            amount: Some(Amount::from_major(25)),
            recipient_account_number: None,
            description: Some("pocket money".to_string()),
            max_uses: None,
            expiry_days: Some(1),
        }))
        .await;
    let Response::Create(created) = created else {
        panic!("expected create response, got {created:?}");
    };
    assert_eq!(created.action.action_type, "WITHDRAW");

    let validated = dispatcher
        .handle(Request::ValidateAction {
            action_id: created.action_id.clone(),
        })
        .await;
    let Response::Validate(validated) = validated else {
        panic!("expected validate response, got {validated:?}");
    };
    assert!(validated.valid);
    let summary = validated.action.unwrap();
    assert_eq!(summary.guardian_name.as_deref(), Some("Alice"));
    assert_eq!(summary.current_uses, 0);

    let executed = dispatcher
        .handle(Request::ExecuteAction {
            action_id: created.action_id.clone(),
        })
        .await;
    let Response::Execute(executed) = executed else {
        panic!("expected execute response, got {executed:?}");
    };
    assert!(executed.success);
    assert_eq!(executed.new_balance, Some(Amount::from_major(975)));

    // The guardian sees the consumed use in their listing.
    let listed = dispatcher
        .handle(Request::ListActions {
            owner_key: "guardian-1".to_string(),
        })
        .await;
    let Response::List(listed) = listed else {
        panic!("expected list response, got {listed:?}");
    };
    assert_eq!(listed.actions.len(), 1);
    assert_eq!(listed.actions[0].current_uses, 1);
}

/// Ledger whose every call fails with an infrastructure fault.
struct DownLedger;

#[async_trait]
impl Ledger for DownLedger {
    async fn resolve_account(
        &self,
        _owner_key: &str,
    ) -> Result<Option<AccountSnapshot>, LedgerError> {
        Err(LedgerError::Unavailable("backend down".to_string()))
    }

    async fn credit(&self, _owner_key: &str, _amount: Amount) -> Result<Amount, LedgerError> {
        Err(LedgerError::Unavailable("backend down".to_string()))
    }

    async fn debit(&self, _owner_key: &str, _amount: Amount) -> Result<Amount, LedgerError> {
        Err(LedgerError::Unavailable("backend down".to_string()))
    }

    async fn approved_recipients(&self, _owner_key: &str) -> Result<Vec<String>, LedgerError> {
        Err(LedgerError::Unavailable("backend down".to_string()))
    }
}

#[tokio::test]
async fn ledger_outage_leaves_action_as_redeemable_as_before() {
    let dir = tempfile::tempdir().unwrap();
    let store =
        FileBackedActionStore::open(dir.path().join("actions.json"), Utc::now()).unwrap();
    let registry = Arc::new(ActionRegistry::new(Arc::new(store)));
    let executor = ActionExecutor::new(
        Arc::clone(&registry),
        Arc::new(DownLedger),
        FraudPolicy::default(),
        Duration::from_secs(5),
    );
    let action = registry
        .create(&new_action(ActionKind::Withdraw {
            amount: Amount::from_major(10),
        }))
        .unwrap();

    let error = executor.execute(&action.id).await.unwrap_err();
    assert!(matches!(error, ExecuteError::Unavailable(_)));
    assert_eq!(error.code(), "unavailable");

    // The reservation was released; a retry after recovery still works.
    assert_eq!(registry.validate(&action.id).unwrap().current_uses, 0);
}

#[tokio::test]
async fn actions_survive_daemon_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("actions.json");

    let action_id = {
        let store = FileBackedActionStore::open(&path, Utc::now()).unwrap();
        let registry = ActionRegistry::new(Arc::new(store));
        registry
            .create(&new_action(ActionKind::Deposit {
                amount: Amount::from_major(5),
            }))
            .unwrap()
            .id
    };

    let store = FileBackedActionStore::open(&path, Utc::now()).unwrap();
    let registry = ActionRegistry::new(Arc::new(store));
    let reloaded = registry.get(&action_id).unwrap().unwrap();
    assert_eq!(reloaded.id, action_id);
    assert!(registry.validate(&action_id).is_ok());
}
