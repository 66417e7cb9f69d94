//! Execution engine.
//!
//! Wires the bounded execution contexts to the command handlers and process
//! managers. Commands run on the executor routes and report a [`Handling`]:
//! the events to publish plus whether the command must be re-delivered
//! later. Events run on the saga routes and fan out as fresh commands. The
//! engine owns the cancellation fences, the retry delay policy and the broadcast
//! channel callers observe terminal outcomes on.

pub mod error;
pub mod handlers;
pub mod sagas;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use crate::blockchain::BlockchainApiClientProvider;
use crate::config::AppConfig;
use crate::core_types::{BlockchainType, OperationId, TransactionId, TransactionOutput};
use crate::dispatch::{CancellationRegistry, Dispatcher, Envelope, MessageProcessor, Route};
use crate::domain::operation::OperationExecution;
use crate::domain::store::{AggregateStore, InMemoryStore};
use crate::domain::transaction::{TransactionExecution, TransactionExecutionState};
use crate::messages::{Command, Event, WorkflowMessage};
use crate::retry::{RetryDelayProvider, RetryReason};

pub use error::WorkflowError;
pub use handlers::{OperationHandlers, TransactionHandlers};

/// What a command handler decided beyond its emitted events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepDisposition {
    Done,
    Retry(RetryReason),
}

/// Result of handling one command.
#[derive(Debug)]
pub struct Handling {
    pub events: Vec<Event>,
    pub disposition: StepDisposition,
}

impl Handling {
    pub fn done() -> Self {
        Self {
            events: Vec::new(),
            disposition: StepDisposition::Done,
        }
    }

    pub fn event(event: Event) -> Self {
        Self {
            events: vec![event],
            disposition: StepDisposition::Done,
        }
    }

    pub fn retry(reason: RetryReason) -> Self {
        Self {
            events: Vec::new(),
            disposition: StepDisposition::Retry(reason),
        }
    }
}

struct EngineInner {
    operations: Arc<dyn AggregateStore<OperationExecution>>,
    transactions: Arc<dyn AggregateStore<TransactionExecution>>,
    operation_handlers: OperationHandlers,
    transaction_handlers: TransactionHandlers,
    registry: CancellationRegistry,
    retry_delays: RetryDelayProvider,
    default_retry_delay: Duration,
    dispatcher: OnceCell<Dispatcher>,
    events_tx: broadcast::Sender<Event>,
}

impl EngineInner {
    fn dispatcher(&self) -> &Dispatcher {
        self.dispatcher
            .get()
            .expect("dispatcher is set before any worker starts")
    }

    async fn handle_command(&self, command: &Command) -> Result<Handling, WorkflowError> {
        match command.clone() {
            Command::StartOperationExecution {
                operation_id,
                blockchain_type,
                asset_id,
                from_address,
                to_address,
                amount,
            } => {
                self.operation_handlers
                    .start_operation_execution(
                        operation_id,
                        blockchain_type,
                        asset_id,
                        from_address,
                        to_address,
                        amount,
                    )
                    .await
            }
            Command::StartOneToManyOutputsExecution {
                operation_id,
                blockchain_type,
                asset_id,
                from_address,
                outputs,
            } => {
                self.operation_handlers
                    .start_one_to_many_outputs_execution(
                        operation_id,
                        blockchain_type,
                        asset_id,
                        from_address,
                        outputs,
                    )
                    .await
            }
            Command::GenerateActiveTransactionId { operation_id } => {
                self.operation_handlers
                    .generate_active_transaction_id(operation_id)
                    .await
            }
            Command::ClearActiveTransaction { operation_id } => {
                self.operation_handlers
                    .clear_active_transaction(operation_id)
                    .await
            }
            Command::NotifyOperationExecutionCompleted {
                operation_id,
                transaction_id,
                transaction_hash,
                block,
                fee,
                outputs,
            } => {
                self.operation_handlers
                    .notify_operation_execution_completed(
                        operation_id,
                        transaction_id,
                        transaction_hash,
                        block,
                        fee,
                        outputs,
                    )
                    .await
            }
            Command::NotifyOperationExecutionFailed {
                operation_id,
                transaction_id,
                error,
                error_code,
            } => {
                self.operation_handlers
                    .notify_operation_execution_failed(
                        operation_id,
                        transaction_id,
                        error,
                        error_code,
                    )
                    .await
            }
            Command::StartTransactionExecution {
                operation_id,
                transaction_id,
                attempt,
                blockchain_type,
                asset_id,
                from_address,
                outputs,
            } => {
                self.transaction_handlers
                    .start_transaction_execution(
                        operation_id,
                        transaction_id,
                        attempt,
                        blockchain_type,
                        asset_id,
                        from_address,
                        outputs,
                    )
                    .await
            }
            Command::LockSourceAddress {
                operation_id,
                transaction_id,
            } => {
                self.transaction_handlers
                    .lock_source_address(operation_id, transaction_id)
                    .await
            }
            Command::BuildTransaction {
                operation_id,
                transaction_id,
            } => {
                self.transaction_handlers
                    .build_transaction(operation_id, transaction_id)
                    .await
            }
            Command::SignTransaction {
                operation_id,
                transaction_id,
            } => {
                self.transaction_handlers
                    .sign_transaction(operation_id, transaction_id)
                    .await
            }
            Command::BroadcastTransaction {
                operation_id,
                transaction_id,
            } => {
                self.transaction_handlers
                    .broadcast_transaction(operation_id, transaction_id)
                    .await
            }
            Command::WaitForTransactionEnding {
                operation_id,
                transaction_id,
            } => {
                self.transaction_handlers
                    .wait_for_transaction_ending(operation_id, transaction_id)
                    .await
            }
            Command::ReleaseSourceAddressLock {
                operation_id,
                transaction_id,
            } => {
                self.transaction_handlers
                    .release_source_address_lock(operation_id, transaction_id)
                    .await
            }
            Command::ClearBroadcastedTransaction {
                operation_id,
                transaction_id,
            } => {
                self.transaction_handlers
                    .clear_broadcasted_transaction(operation_id, transaction_id)
                    .await
            }
        }
    }

    async fn publish_events(&self, events: Vec<Event>) {
        for event in events {
            let operation_id = event.operation_id();
            let _ = self.events_tx.send(event.clone());
            for route in [Route::OperationsSaga, Route::TransactionsSaga] {
                let sequence = self.registry.next_sequence(route, operation_id);
                self.dispatcher()
                    .dispatch(Envelope {
                        route,
                        message: WorkflowMessage::Event(event.clone()),
                        sequence,
                        attempt: 1,
                    })
                    .await;
            }
        }
    }

    async fn run_saga(&self, route: Route, event: &Event) {
        let commands = match route {
            Route::OperationsSaga => sagas::operation::handle(event),
            Route::TransactionsSaga => sagas::transaction::handle(event),
            _ => {
                warn!(%route, event = event.name(), "event delivered to an executor route");
                return;
            }
        };

        for (target, command) in commands {
            let sequence = self.registry.next_sequence(target, command.operation_id());
            self.dispatcher()
                .dispatch(Envelope {
                    route: target,
                    message: WorkflowMessage::Command(command),
                    sequence,
                    attempt: 1,
                })
                .await;
        }

        // The settled-check runs at both possible tails of an operation: the
        // terminal outcome on the operation side and the transaction cleanup
        // on the other. The two tails race, but the later of the two checks
        // observes both the terminal save and the cleanup save, so exactly
        // the last tail drops the fences.
        if route == Route::OperationsSaga && event.is_operation_terminal()
            || route == Route::TransactionsSaga
                && matches!(event, Event::BroadcastedTransactionCleared { .. })
        {
            self.forget_if_settled(event.operation_id()).await;
        }
    }

    /// Drop the operation's fences once it is terminal and its last
    /// transaction attempt has been cleaned up.
    async fn forget_if_settled(&self, operation_id: OperationId) {
        let operation = match self.operations.load(operation_id).await {
            Ok(Some(op)) if op.state.is_terminal() => op,
            Ok(_) => return,
            Err(err) => {
                warn!(%operation_id, %err, "fence cleanup postponed");
                return;
            }
        };

        if operation.attempt_count > 0 {
            let last_attempt = TransactionId::derive(operation_id, operation.attempt_count);
            match self.transactions.load(last_attempt).await {
                Ok(Some(tx)) if tx.state != TransactionExecutionState::Cleared => return,
                Ok(_) => {}
                Err(err) => {
                    warn!(%operation_id, %err, "fence cleanup postponed");
                    return;
                }
            }
        }

        self.registry.forget(operation_id);
    }
}

impl EngineInner {
    /// Re-issue the command after the delay. The re-delivery is a fresh
    /// sequenced message; if the attempt it belongs to is already superseded,
    /// the handler absorbs it, and once the operation has settled no sequence
    /// can be issued at all and the loop dies out.
    fn schedule_retry(&self, envelope: Envelope, delay: Duration) {
        let operation_id = envelope.message.operation_id();
        let Some(sequence) = self.registry.try_next_sequence(envelope.route, operation_id) else {
            debug!(
                route = %envelope.route,
                message = envelope.message.name(),
                %operation_id,
                "operation settled, re-delivery dropped"
            );
            return;
        };
        let retry = Envelope {
            sequence,
            attempt: envelope.attempt + 1,
            ..envelope
        };
        debug!(
            route = %retry.route,
            message = retry.message.name(),
            operation_id = %retry.message.operation_id(),
            delivery_attempt = retry.attempt,
            delay_ms = delay.as_millis() as u64,
            "re-delivery scheduled"
        );
        self.dispatcher().dispatch_after(retry, delay);
    }
}

#[async_trait]
impl MessageProcessor for EngineInner {
    async fn process(&self, envelope: Envelope) {
        let operation_id = envelope.message.operation_id();
        if !self.registry.admit(envelope.route, operation_id) {
            debug!(
                route = %envelope.route,
                message = envelope.message.name(),
                %operation_id,
                sequence = envelope.sequence,
                "delivery for settled operation dropped"
            );
            return;
        }

        match &envelope.message {
            WorkflowMessage::Command(command) => match self.handle_command(command).await {
                Ok(handling) => {
                    self.publish_events(handling.events).await;
                    if let StepDisposition::Retry(reason) = handling.disposition {
                        self.schedule_retry(envelope, self.retry_delays.delay_for(reason));
                    }
                }
                Err(err) if err.is_consistency_violation() => {
                    error!(
                        command = command.name(),
                        %operation_id,
                        %err,
                        "command dropped on consistency violation"
                    );
                }
                Err(err) => {
                    warn!(
                        command = command.name(),
                        %operation_id,
                        %err,
                        delivery_attempt = envelope.attempt,
                        "command failed, re-delivery scheduled"
                    );
                    self.schedule_retry(envelope, self.default_retry_delay);
                }
            },
            WorkflowMessage::Event(event) => {
                self.run_saga(envelope.route, event).await;
            }
        }
    }
}

/// Public face of the orchestration runtime.
pub struct ExecutionEngine {
    inner: Arc<EngineInner>,
    dispatcher: Dispatcher,
}

impl ExecutionEngine {
    pub fn start(config: &AppConfig, clients: Arc<BlockchainApiClientProvider>) -> Self {
        Self::with_stores(config, clients, InMemoryStore::new(), InMemoryStore::new())
    }

    pub fn with_stores(
        config: &AppConfig,
        clients: Arc<BlockchainApiClientProvider>,
        operations: Arc<InMemoryStore<OperationExecution>>,
        transactions: Arc<InMemoryStore<TransactionExecution>>,
    ) -> Self {
        let operations: Arc<dyn AggregateStore<OperationExecution>> = operations;
        let transactions: Arc<dyn AggregateStore<TransactionExecution>> = transactions;
        let (events_tx, _) = broadcast::channel(1024);

        let inner = Arc::new(EngineInner {
            operations: operations.clone(),
            transactions: transactions.clone(),
            operation_handlers: OperationHandlers::new(operations, config.execution.clone()),
            transaction_handlers: TransactionHandlers::new(transactions, clients),
            registry: CancellationRegistry::new(),
            retry_delays: RetryDelayProvider::from_settings(&config.retry),
            default_retry_delay: Duration::from_millis(
                config.dispatch.failed_command_retry_delay_ms,
            ),
            dispatcher: OnceCell::new(),
            events_tx,
        });

        let dispatcher = Dispatcher::start(inner.clone(), &config.dispatch);
        inner
            .dispatcher
            .set(dispatcher.clone())
            .unwrap_or_else(|_| unreachable!("dispatcher is set exactly once"));

        Self { inner, dispatcher }
    }

    /// Submit a single-destination operation.
    pub async fn start_operation(
        &self,
        operation_id: OperationId,
        blockchain_type: BlockchainType,
        asset_id: String,
        from_address: String,
        to_address: String,
        amount: u64,
    ) {
        self.submit(Command::StartOperationExecution {
            operation_id,
            blockchain_type,
            asset_id,
            from_address,
            to_address,
            amount,
        })
        .await;
    }

    /// Submit an operation paying several destinations in one transaction.
    pub async fn start_one_to_many_operation(
        &self,
        operation_id: OperationId,
        blockchain_type: BlockchainType,
        asset_id: String,
        from_address: String,
        outputs: Vec<TransactionOutput>,
    ) {
        self.submit(Command::StartOneToManyOutputsExecution {
            operation_id,
            blockchain_type,
            asset_id,
            from_address,
            outputs,
        })
        .await;
    }

    async fn submit(&self, command: Command) {
        let sequence = self
            .inner
            .registry
            .next_sequence(Route::OperationsExecutor, command.operation_id());
        self.dispatcher
            .dispatch(Envelope {
                route: Route::OperationsExecutor,
                message: WorkflowMessage::Command(command),
                sequence,
                attempt: 1,
            })
            .await;
    }

    /// Observe every event the workflow publishes, terminal outcomes
    /// included.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.events_tx.subscribe()
    }

    pub fn tracked_operations(&self) -> usize {
        self.inner.registry.tracked_operations()
    }

    pub fn shutdown(&self) {
        self.dispatcher.shutdown();
    }
}
