//! Operation-level command handlers.
//!
//! Every handler is idempotent under re-delivery: re-processing a command the
//! aggregate already absorbed re-emits the same event without mutating state,
//! and commands arriving after a terminal outcome are absorbed silently so
//! exactly one terminal event ever leaves the operation.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::ExecutionSettings;
use crate::core_types::{BlockchainType, OperationId, TransactionId, TransactionOutput};
use crate::domain::operation::{OperationExecution, OperationExecutionState};
use crate::domain::store::AggregateStore;
use crate::messages::{Event, OperationErrorCode};
use crate::workflow::Handling;
use crate::workflow::error::WorkflowError;

pub struct OperationHandlers {
    operations: Arc<dyn AggregateStore<OperationExecution>>,
    settings: ExecutionSettings,
}

impl OperationHandlers {
    pub fn new(
        operations: Arc<dyn AggregateStore<OperationExecution>>,
        settings: ExecutionSettings,
    ) -> Self {
        Self {
            operations,
            settings,
        }
    }

    async fn load(&self, operation_id: OperationId) -> Result<OperationExecution, WorkflowError> {
        self.operations
            .load(operation_id)
            .await?
            .ok_or_else(|| WorkflowError::AggregateNotFound(format!("operation {operation_id}")))
    }

    /// The operation hands control to the transaction context as soon as the
    /// generated id event leaves; the aggregate observes that handover on the
    /// first command coming back from that context.
    fn ensure_in_progress(op: &mut OperationExecution) -> Result<(), WorkflowError> {
        if op.state == OperationExecutionState::ActiveTransactionIdGenerated {
            op.switch(OperationExecutionState::TransactionExecutionInProgress)?;
        }
        Ok(())
    }

    pub async fn start_operation_execution(
        &self,
        operation_id: OperationId,
        blockchain_type: BlockchainType,
        asset_id: String,
        from_address: String,
        to_address: String,
        amount: u64,
    ) -> Result<Handling, WorkflowError> {
        self.start(
            operation_id,
            blockchain_type,
            asset_id,
            from_address,
            vec![TransactionOutput::new(to_address, amount)],
            false,
        )
        .await
    }

    pub async fn start_one_to_many_outputs_execution(
        &self,
        operation_id: OperationId,
        blockchain_type: BlockchainType,
        asset_id: String,
        from_address: String,
        outputs: Vec<TransactionOutput>,
    ) -> Result<Handling, WorkflowError> {
        self.start(
            operation_id,
            blockchain_type,
            asset_id,
            from_address,
            outputs,
            true,
        )
        .await
    }

    async fn start(
        &self,
        operation_id: OperationId,
        blockchain_type: BlockchainType,
        asset_id: String,
        from_address: String,
        outputs: Vec<TransactionOutput>,
        one_to_many: bool,
    ) -> Result<Handling, WorkflowError> {
        if self.operations.load(operation_id).await?.is_none() {
            let op = OperationExecution::start(
                operation_id,
                blockchain_type,
                asset_id,
                from_address,
                outputs,
                one_to_many,
            );
            self.operations.save(&op).await?;
            info!(%operation_id, one_to_many, "operation execution started");
        } else {
            debug!(%operation_id, "operation already started, re-emitting");
        }
        Ok(Handling::event(Event::OperationExecutionStarted {
            operation_id,
        }))
    }

    pub async fn generate_active_transaction_id(
        &self,
        operation_id: OperationId,
    ) -> Result<Handling, WorkflowError> {
        let mut op = self.load(operation_id).await?;

        match op.state {
            OperationExecutionState::ActiveTransactionIdGenerated => {
                // Redelivery after the switch already happened.
                let transaction_id = op.active_transaction_id.ok_or_else(|| {
                    WorkflowError::AggregateNotFound(format!(
                        "active transaction of operation {operation_id}"
                    ))
                })?;
                Ok(Handling::event(Self::generated_event(&op, transaction_id)))
            }
            OperationExecutionState::Started | OperationExecutionState::ActiveTransactionCleared => {
                if op.attempt_count >= self.settings.max_transaction_attempts {
                    warn!(
                        %operation_id,
                        attempts = op.attempt_count,
                        "transaction attempt budget exhausted"
                    );
                    return Ok(Handling::event(Event::TransactionRebuildingRejected {
                        operation_id,
                        reason: format!(
                            "transaction attempt limit of {} reached",
                            self.settings.max_transaction_attempts
                        ),
                    }));
                }
                let attempt = op.attempt_count + 1;
                let transaction_id = TransactionId::derive(operation_id, attempt);
                op.switch(OperationExecutionState::ActiveTransactionIdGenerated)?;
                op.active_transaction_id = Some(transaction_id);
                op.attempt_count = attempt;
                self.operations.save(&op).await?;
                info!(%operation_id, %transaction_id, attempt, "active transaction id generated");
                Ok(Handling::event(Self::generated_event(&op, transaction_id)))
            }
            OperationExecutionState::TransactionExecutionInProgress => {
                warn!(
                    %operation_id,
                    "generate requested while a transaction is in progress, ignored"
                );
                Ok(Handling::done())
            }
            OperationExecutionState::Completed | OperationExecutionState::Failed => {
                debug!(%operation_id, "generate after terminal outcome, ignored");
                Ok(Handling::done())
            }
        }
    }

    fn generated_event(op: &OperationExecution, transaction_id: TransactionId) -> Event {
        Event::ActiveTransactionIdGenerated {
            operation_id: op.operation_id,
            transaction_id,
            attempt: op.attempt_count,
            blockchain_type: op.blockchain_type.clone(),
            asset_id: op.asset_id.clone(),
            from_address: op.from_address.clone(),
            outputs: op.outputs.clone(),
        }
    }

    pub async fn clear_active_transaction(
        &self,
        operation_id: OperationId,
    ) -> Result<Handling, WorkflowError> {
        let mut op = self.load(operation_id).await?;

        if op.state.is_terminal() {
            debug!(%operation_id, "clear after terminal outcome, ignored");
            return Ok(Handling::done());
        }
        if op.state == OperationExecutionState::ActiveTransactionCleared {
            return Ok(Handling::event(Event::ActiveTransactionCleared {
                operation_id,
            }));
        }

        Self::ensure_in_progress(&mut op)?;
        op.switch(OperationExecutionState::ActiveTransactionCleared)?;
        op.active_transaction_id = None;
        self.operations.save(&op).await?;
        info!(%operation_id, attempts = op.attempt_count, "active transaction cleared");
        Ok(Handling::event(Event::ActiveTransactionCleared {
            operation_id,
        }))
    }

    pub async fn notify_operation_execution_completed(
        &self,
        operation_id: OperationId,
        transaction_id: TransactionId,
        transaction_hash: String,
        block: u64,
        fee: u64,
        outputs: Vec<TransactionOutput>,
    ) -> Result<Handling, WorkflowError> {
        let mut op = self.load(operation_id).await?;

        if op.state.is_terminal() {
            debug!(%operation_id, "completion after terminal outcome, ignored");
            return Ok(Handling::done());
        }

        Self::ensure_in_progress(&mut op)?;
        op.switch(OperationExecutionState::Completed)?;
        op.active_transaction_id = None;
        op.transaction_hash = Some(transaction_hash.clone());
        op.block = Some(block);
        op.fee = Some(fee);
        self.operations.save(&op).await?;
        info!(%operation_id, %transaction_id, %transaction_hash, block, "operation completed");

        let event = if op.one_to_many {
            Event::OneToManyOperationExecutionCompleted {
                operation_id,
                transaction_id,
                transaction_hash,
                block,
                fee,
                outputs,
            }
        } else {
            Event::OperationExecutionCompleted {
                operation_id,
                transaction_id,
                transaction_hash,
                block,
                fee,
            }
        };
        Ok(Handling::event(event))
    }

    pub async fn notify_operation_execution_failed(
        &self,
        operation_id: OperationId,
        transaction_id: Option<TransactionId>,
        error: String,
        error_code: OperationErrorCode,
    ) -> Result<Handling, WorkflowError> {
        let mut op = self.load(operation_id).await?;

        if op.state.is_terminal() {
            debug!(%operation_id, "failure after terminal outcome, ignored");
            return Ok(Handling::done());
        }

        Self::ensure_in_progress(&mut op)?;
        op.switch(OperationExecutionState::Failed)?;
        op.active_transaction_id = None;
        op.error = Some(error.clone());
        op.error_code = Some(error_code);
        self.operations.save(&op).await?;
        warn!(%operation_id, error, ?error_code, "operation failed");

        Ok(Handling::event(Event::OperationExecutionFailed {
            operation_id,
            transaction_id,
            error,
            error_code,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::store::InMemoryStore;

    fn handlers() -> (OperationHandlers, Arc<InMemoryStore<OperationExecution>>) {
        let store = InMemoryStore::new();
        (
            OperationHandlers::new(
                store.clone(),
                ExecutionSettings {
                    max_transaction_attempts: 2,
                },
            ),
            store,
        )
    }

    async fn started(handlers: &OperationHandlers) -> OperationId {
        let operation_id = OperationId::new();
        handlers
            .start_operation_execution(
                operation_id,
                "Bitcoin".into(),
                "BTC".to_string(),
                "hot-wallet".to_string(),
                "dest".to_string(),
                10,
            )
            .await
            .unwrap();
        operation_id
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let (handlers, store) = handlers();
        let operation_id = started(&handlers).await;

        let again = handlers
            .start_operation_execution(
                operation_id,
                "Bitcoin".into(),
                "BTC".to_string(),
                "hot-wallet".to_string(),
                "dest".to_string(),
                10,
            )
            .await
            .unwrap();

        assert_eq!(again.events.len(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn generate_is_deterministic_under_redelivery() {
        let (handlers, _) = handlers();
        let operation_id = started(&handlers).await;

        let first = handlers
            .generate_active_transaction_id(operation_id)
            .await
            .unwrap();
        let redelivered = handlers
            .generate_active_transaction_id(operation_id)
            .await
            .unwrap();

        let id_of = |handling: &Handling| match &handling.events[0] {
            Event::ActiveTransactionIdGenerated { transaction_id, .. } => *transaction_id,
            other => panic!("unexpected event {other:?}"),
        };
        assert_eq!(id_of(&first), id_of(&redelivered));
        assert_eq!(id_of(&first), TransactionId::derive(operation_id, 1));
    }

    #[tokio::test]
    async fn attempt_budget_rejects_further_generation() {
        let (handlers, _) = handlers();
        let operation_id = started(&handlers).await;

        for _ in 0..2 {
            handlers
                .generate_active_transaction_id(operation_id)
                .await
                .unwrap();
            handlers
                .clear_active_transaction(operation_id)
                .await
                .unwrap();
        }

        let third = handlers
            .generate_active_transaction_id(operation_id)
            .await
            .unwrap();
        assert!(matches!(
            third.events.as_slice(),
            [Event::TransactionRebuildingRejected { .. }]
        ));
    }

    #[tokio::test]
    async fn exactly_one_terminal_event_is_emitted() {
        let (handlers, _) = handlers();
        let operation_id = started(&handlers).await;
        handlers
            .generate_active_transaction_id(operation_id)
            .await
            .unwrap();
        let transaction_id = TransactionId::derive(operation_id, 1);

        let completed = handlers
            .notify_operation_execution_completed(
                operation_id,
                transaction_id,
                "0xabc".to_string(),
                10,
                1,
                vec![],
            )
            .await
            .unwrap();
        assert!(matches!(
            completed.events.as_slice(),
            [Event::OperationExecutionCompleted { .. }]
        ));

        let late_failure = handlers
            .notify_operation_execution_failed(
                operation_id,
                Some(transaction_id),
                "late".to_string(),
                OperationErrorCode::Unknown,
            )
            .await
            .unwrap();
        assert!(late_failure.events.is_empty(), "terminal outcome is final");

        let late_completion = handlers
            .notify_operation_execution_completed(
                operation_id,
                transaction_id,
                "0xdef".to_string(),
                11,
                1,
                vec![],
            )
            .await
            .unwrap();
        assert!(late_completion.events.is_empty());
    }

    #[tokio::test]
    async fn one_to_many_completion_carries_outputs() {
        let (handlers, _) = handlers();
        let operation_id = OperationId::new();
        let outputs = vec![
            TransactionOutput::new("a", 1),
            TransactionOutput::new("b", 2),
        ];
        handlers
            .start_one_to_many_outputs_execution(
                operation_id,
                "Bitcoin".into(),
                "BTC".to_string(),
                "hot-wallet".to_string(),
                outputs.clone(),
            )
            .await
            .unwrap();
        handlers
            .generate_active_transaction_id(operation_id)
            .await
            .unwrap();

        let completed = handlers
            .notify_operation_execution_completed(
                operation_id,
                TransactionId::derive(operation_id, 1),
                "0xabc".to_string(),
                10,
                1,
                outputs.clone(),
            )
            .await
            .unwrap();

        match &completed.events[0] {
            Event::OneToManyOperationExecutionCompleted {
                outputs: emitted, ..
            } => assert_eq!(emitted, &outputs),
            other => panic!("unexpected event {other:?}"),
        }
    }
}
