//! End-to-end execution flows against the scriptable mock integration.
//!
//! Every test drives the real engine: bounded worker pools, cancellation fences,
//! both process managers and the command handlers. Retry delays are shrunk
//! to keep the flows fast.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::timeout;

use chainops_executor::blockchain::mock::MockBlockchainApiClient;
use chainops_executor::blockchain::{
    BlockchainApiClientProvider, BroadcastOutcome, BuildOutcome, ConfirmationStatus,
};
use chainops_executor::config::{AppConfig, DispatchSettings, RetrySettings};
use chainops_executor::core_types::{OperationId, TransactionId, TransactionOutput};
use chainops_executor::messages::{Event, OperationErrorCode};
use chainops_executor::workflow::ExecutionEngine;

struct Harness {
    engine: ExecutionEngine,
    api: Arc<MockBlockchainApiClient>,
}

fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.retry = RetrySettings {
        source_address_locking_ms: 10,
        wait_for_transaction_ending_ms: 10,
        not_enough_balance_ms: 10,
        rebuilding_confirmation_check_ms: 10,
    };
    config.dispatch = DispatchSettings {
        workers: 2,
        queue_capacity: 64,
        failed_command_retry_delay_ms: 20,
    };
    config.execution.max_transaction_attempts = 3;
    config
}

fn harness_with(config: AppConfig) -> Harness {
    let api = Arc::new(MockBlockchainApiClient::new());
    let mut provider = BlockchainApiClientProvider::new();
    provider.register("Mock".into(), api.clone());
    Harness {
        engine: ExecutionEngine::start(&config, Arc::new(provider)),
        api,
    }
}

fn harness() -> Harness {
    harness_with(test_config())
}

async fn start_transfer(harness: &Harness, operation_id: OperationId, from: &str) {
    harness
        .engine
        .start_operation(
            operation_id,
            "Mock".into(),
            "BTC".to_string(),
            from.to_string(),
            "dest-addr".to_string(),
            50_000,
        )
        .await;
}

/// Wait for the single terminal outcome event of the operation.
async fn await_terminal(events: &mut broadcast::Receiver<Event>, operation_id: OperationId) -> Event {
    timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event)
                    if event.operation_id() == operation_id && event.is_operation_terminal() =>
                {
                    return event;
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("operation must reach a terminal outcome within 5s")
}

async fn await_registry_drained(harness: &Harness) {
    timeout(Duration::from_secs(5), async {
        while harness.engine.tracked_operations() != 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("fences must be dropped after the operation ends");
}

#[tokio::test]
async fn single_transfer_completes_end_to_end() {
    let h = harness();
    let mut events = h.engine.subscribe();
    let operation_id = OperationId::new();

    start_transfer(&h, operation_id, "hot-wallet-1").await;
    let terminal = await_terminal(&mut events, operation_id).await;

    match terminal {
        Event::OperationExecutionCompleted {
            transaction_id,
            transaction_hash,
            ..
        } => {
            assert_eq!(transaction_id, TransactionId::derive(operation_id, 1));
            assert!(!transaction_hash.is_empty());
        }
        other => panic!("expected completion, got {other:?}"),
    }

    await_registry_drained(&h).await;
    assert_eq!(h.api.builds.load(Ordering::SeqCst), 1);
    assert_eq!(h.api.signs.load(Ordering::SeqCst), 1);
    assert_eq!(h.api.broadcasts.load(Ordering::SeqCst), 1);
    assert_eq!(h.api.forgets.load(Ordering::SeqCst), 1);
    assert_eq!(h.api.held_locks(), 0, "lock must be released");
    h.engine.shutdown();
}

#[tokio::test]
async fn one_to_many_transfer_reports_outputs() {
    let h = harness();
    let mut events = h.engine.subscribe();
    let operation_id = OperationId::new();

    h.engine
        .start_one_to_many_operation(
            operation_id,
            "Mock".into(),
            "BTC".to_string(),
            "hot-wallet-2".to_string(),
            vec![
                TransactionOutput::new("dest-a", 1_000),
                TransactionOutput::new("dest-b", 2_000),
            ],
        )
        .await;

    let terminal = await_terminal(&mut events, operation_id).await;
    match terminal {
        Event::OneToManyOperationExecutionCompleted { outputs, .. } => {
            assert!(!outputs.is_empty());
        }
        other => panic!("expected one-to-many completion, got {other:?}"),
    }
    h.engine.shutdown();
}

#[tokio::test]
async fn transient_build_failure_defers_then_completes() {
    let h = harness();
    let mut events = h.engine.subscribe();
    let operation_id = OperationId::new();

    h.api.script_build(BuildOutcome::TransientFailure {
        reason: "not enough confirmed balance".to_string(),
    });
    start_transfer(&h, operation_id, "hot-wallet-3").await;

    let terminal = await_terminal(&mut events, operation_id).await;
    assert!(matches!(
        terminal,
        Event::OperationExecutionCompleted { .. }
    ));
    assert!(
        h.api.builds.load(Ordering::SeqCst) >= 2,
        "build must have been retried after the transient failure"
    );
    h.engine.shutdown();
}

#[tokio::test]
async fn rebuild_cycle_uses_a_fresh_transaction_id() {
    let h = harness();
    let mut events = h.engine.subscribe();
    let operation_id = OperationId::new();

    h.api.script_broadcast(BroadcastOutcome::RebuildRequired {
        reason: "built transaction expired".to_string(),
    });
    start_transfer(&h, operation_id, "hot-wallet-4").await;

    let terminal = await_terminal(&mut events, operation_id).await;
    match terminal {
        Event::OperationExecutionCompleted { transaction_id, .. } => {
            assert_eq!(
                transaction_id,
                TransactionId::derive(operation_id, 2),
                "second attempt must complete under the second derived id"
            );
        }
        other => panic!("expected completion, got {other:?}"),
    }
    assert_eq!(h.api.builds.load(Ordering::SeqCst), 2);
    assert_eq!(h.api.held_locks(), 0);
    h.engine.shutdown();
}

#[tokio::test]
async fn attempt_budget_exhaustion_fails_the_operation() {
    let mut config = test_config();
    config.execution.max_transaction_attempts = 2;
    let h = harness_with(config);
    let mut events = h.engine.subscribe();
    let operation_id = OperationId::new();

    for _ in 0..2 {
        h.api.script_build(BuildOutcome::Rejected {
            reason: "utxo set changed".to_string(),
        });
    }
    start_transfer(&h, operation_id, "hot-wallet-5").await;

    let terminal = await_terminal(&mut events, operation_id).await;
    match terminal {
        Event::OperationExecutionFailed {
            transaction_id,
            error_code,
            ..
        } => {
            assert_eq!(error_code, OperationErrorCode::RebuildingRejected);
            assert!(transaction_id.is_none(), "no live transaction at rejection");
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(h.api.held_locks(), 0, "every attempt released its lock");
    h.engine.shutdown();
}

#[tokio::test]
async fn signing_failure_fails_the_operation_and_releases_the_lock() {
    let h = harness();
    let mut events = h.engine.subscribe();
    let operation_id = OperationId::new();

    h.api
        .script_sign(chainops_executor::blockchain::SignOutcome::Failed {
            reason: "signing service unavailable".to_string(),
        });
    start_transfer(&h, operation_id, "hot-wallet-6").await;

    let terminal = await_terminal(&mut events, operation_id).await;
    match terminal {
        Event::OperationExecutionFailed { error_code, .. } => {
            assert_eq!(error_code, OperationErrorCode::SigningFailed);
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(h.api.held_locks(), 0);
    assert_eq!(h.api.broadcasts.load(Ordering::SeqCst), 0);
    h.engine.shutdown();
}

#[tokio::test]
async fn already_broadcasted_counts_as_success() {
    let h = harness();
    let mut events = h.engine.subscribe();
    let operation_id = OperationId::new();

    h.api.script_broadcast(BroadcastOutcome::AlreadyBroadcasted);
    start_transfer(&h, operation_id, "hot-wallet-7").await;

    let terminal = await_terminal(&mut events, operation_id).await;
    assert!(matches!(
        terminal,
        Event::OperationExecutionCompleted { .. }
    ));
    h.engine.shutdown();
}

#[tokio::test]
async fn on_chain_failure_is_terminal() {
    let h = harness();
    let mut events = h.engine.subscribe();
    let operation_id = OperationId::new();

    h.api.script_confirmation(ConfirmationStatus::Failed {
        error: "reverted on chain".to_string(),
        repeatable: false,
    });
    start_transfer(&h, operation_id, "hot-wallet-8").await;

    let terminal = await_terminal(&mut events, operation_id).await;
    match terminal {
        Event::OperationExecutionFailed { error_code, .. } => {
            assert_eq!(error_code, OperationErrorCode::OnChainFailure);
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(h.api.held_locks(), 0);
    h.engine.shutdown();
}

#[tokio::test]
async fn pending_confirmations_poll_until_the_chain_settles() {
    let h = harness();
    let mut events = h.engine.subscribe();
    let operation_id = OperationId::new();

    h.api.script_confirmation(ConfirmationStatus::Pending);
    h.api.script_confirmation(ConfirmationStatus::Pending);
    start_transfer(&h, operation_id, "hot-wallet-9").await;

    let terminal = await_terminal(&mut events, operation_id).await;
    assert!(matches!(
        terminal,
        Event::OperationExecutionCompleted { .. }
    ));
    assert!(
        h.api.confirmation_polls.load(Ordering::SeqCst) >= 3,
        "two pending polls precede the confirmed one"
    );
    h.engine.shutdown();
}

#[tokio::test]
async fn contended_source_address_serializes_operations() {
    let h = harness();
    let mut events = h.engine.subscribe();
    let first = OperationId::new();
    let second = OperationId::new();

    start_transfer(&h, first, "shared-wallet").await;
    start_transfer(&h, second, "shared-wallet").await;

    let mut completed = Vec::new();
    for _ in 0..2 {
        let terminal = await_terminal_any(&mut events, &[first, second]).await;
        assert!(matches!(
            terminal,
            Event::OperationExecutionCompleted { .. }
        ));
        completed.push(terminal.operation_id());
    }
    completed.sort_by_key(|id| id.to_string());
    let mut expected = vec![first, second];
    expected.sort_by_key(|id| id.to_string());
    assert_eq!(completed, expected, "both operations must complete");
    assert_eq!(h.api.held_locks(), 0);
    h.engine.shutdown();
}

async fn await_terminal_any(
    events: &mut broadcast::Receiver<Event>,
    operations: &[OperationId],
) -> Event {
    timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event)
                    if operations.contains(&event.operation_id())
                        && event.is_operation_terminal() =>
                {
                    return event;
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("both operations must reach terminal outcomes within 5s")
}
