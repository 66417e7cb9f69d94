//! Transaction-level command handlers.
//!
//! Each handler performs one integration step and records its outcome on the
//! `TransactionExecution` aggregate. Re-delivered commands re-emit the event
//! the aggregate already recorded instead of repeating the side effect, so
//! the integration sees each step at most once per attempt.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::blockchain::{
    BlockchainApiClient, BlockchainApiClientProvider, BroadcastOutcome, BuildOutcome,
    BuildRequest, ConfirmationStatus, LockOutcome, SignOutcome,
};
use crate::core_types::{BlockchainType, OperationId, TransactionId, TransactionOutput};
use crate::domain::store::AggregateStore;
use crate::domain::transaction::{TransactionExecution, TransactionExecutionState};
use crate::messages::{Event, OperationErrorCode};
use crate::retry::RetryReason;
use crate::workflow::Handling;
use crate::workflow::error::WorkflowError;

pub struct TransactionHandlers {
    transactions: Arc<dyn AggregateStore<TransactionExecution>>,
    clients: Arc<BlockchainApiClientProvider>,
}

impl TransactionHandlers {
    pub fn new(
        transactions: Arc<dyn AggregateStore<TransactionExecution>>,
        clients: Arc<BlockchainApiClientProvider>,
    ) -> Self {
        Self {
            transactions,
            clients,
        }
    }

    async fn load(
        &self,
        transaction_id: TransactionId,
    ) -> Result<TransactionExecution, WorkflowError> {
        self.transactions
            .load(transaction_id)
            .await?
            .ok_or_else(|| {
                WorkflowError::AggregateNotFound(format!("transaction {transaction_id}"))
            })
    }

    fn client(
        &self,
        blockchain_type: &BlockchainType,
    ) -> Result<Arc<dyn BlockchainApiClient>, WorkflowError> {
        self.clients
            .get(blockchain_type)
            .ok_or_else(|| WorkflowError::UnknownBlockchainType(blockchain_type.to_string()))
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn start_transaction_execution(
        &self,
        operation_id: OperationId,
        transaction_id: TransactionId,
        attempt: u32,
        blockchain_type: BlockchainType,
        asset_id: String,
        from_address: String,
        outputs: Vec<TransactionOutput>,
    ) -> Result<Handling, WorkflowError> {
        if self.transactions.load(transaction_id).await?.is_none() {
            let tx = TransactionExecution::start(
                transaction_id,
                operation_id,
                attempt,
                blockchain_type,
                asset_id,
                from_address,
                outputs,
            );
            self.transactions.save(&tx).await?;
            info!(%operation_id, %transaction_id, attempt, "transaction execution started");
        } else {
            debug!(%transaction_id, "transaction already started, re-emitting");
        }
        Ok(Handling::event(Event::TransactionExecutionStarted {
            operation_id,
            transaction_id,
        }))
    }

    pub async fn lock_source_address(
        &self,
        operation_id: OperationId,
        transaction_id: TransactionId,
    ) -> Result<Handling, WorkflowError> {
        let mut tx = self.load(transaction_id).await?;

        match tx.state {
            TransactionExecutionState::Started => {}
            TransactionExecutionState::SourceAddressLocked => {
                debug!(%transaction_id, "lock already taken, re-emitting");
                return Ok(Handling::event(Event::SourceAddressLocked {
                    operation_id,
                    transaction_id,
                }));
            }
            _ => {
                debug!(%transaction_id, state = ?tx.state, "lock command out of phase, ignored");
                return Ok(Handling::done());
            }
        }

        let client = self.client(&tx.blockchain_type)?;
        match client.lock_address(&tx.from_address, transaction_id).await? {
            LockOutcome::Acquired => {
                tx.switch(TransactionExecutionState::SourceAddressLocked)?;
                self.transactions.save(&tx).await?;
                info!(%operation_id, %transaction_id, address = %tx.from_address, "source address locked");
                Ok(Handling::event(Event::SourceAddressLocked {
                    operation_id,
                    transaction_id,
                }))
            }
            LockOutcome::HeldByOther => {
                debug!(%transaction_id, address = %tx.from_address, "source address busy");
                Ok(Handling::retry(RetryReason::SourceAddressLocking))
            }
        }
    }

    pub async fn build_transaction(
        &self,
        operation_id: OperationId,
        transaction_id: TransactionId,
    ) -> Result<Handling, WorkflowError> {
        let mut tx = self.load(transaction_id).await?;

        match tx.state {
            TransactionExecutionState::SourceAddressLocked => {}
            TransactionExecutionState::Built => {
                let transaction_context = tx.transaction_context.clone().unwrap_or_default();
                return Ok(Handling::event(Event::TransactionBuilt {
                    operation_id,
                    transaction_id,
                    transaction_context,
                }));
            }
            TransactionExecutionState::BuildingRejected => {
                return Ok(Handling::event(Event::TransactionBuildingRejected {
                    operation_id,
                    transaction_id,
                    reason: tx.error.clone().unwrap_or_default(),
                }));
            }
            _ => {
                debug!(%transaction_id, state = ?tx.state, "build command out of phase, ignored");
                return Ok(Handling::done());
            }
        }

        let client = self.client(&tx.blockchain_type)?;
        let request = BuildRequest {
            operation_id,
            transaction_id,
            asset_id: tx.asset_id.clone(),
            from_address: tx.from_address.clone(),
            outputs: tx.outputs.clone(),
        };
        match client.build_transaction(&request).await? {
            BuildOutcome::Built {
                transaction_context,
            } => {
                tx.transaction_context = Some(transaction_context.clone());
                tx.switch(TransactionExecutionState::Built)?;
                self.transactions.save(&tx).await?;
                info!(%operation_id, %transaction_id, "transaction built");
                Ok(Handling::event(Event::TransactionBuilt {
                    operation_id,
                    transaction_id,
                    transaction_context,
                }))
            }
            BuildOutcome::Rejected { reason } => {
                tx.error = Some(reason.clone());
                tx.switch(TransactionExecutionState::BuildingRejected)?;
                self.transactions.save(&tx).await?;
                warn!(%operation_id, %transaction_id, reason, "transaction building rejected");
                Ok(Handling::event(Event::TransactionBuildingRejected {
                    operation_id,
                    transaction_id,
                    reason,
                }))
            }
            BuildOutcome::TransientFailure { reason } => {
                debug!(%transaction_id, reason, "transaction building deferred");
                Ok(Handling::retry(RetryReason::NotEnoughBalance))
            }
        }
    }

    pub async fn sign_transaction(
        &self,
        operation_id: OperationId,
        transaction_id: TransactionId,
    ) -> Result<Handling, WorkflowError> {
        let mut tx = self.load(transaction_id).await?;

        match tx.state {
            TransactionExecutionState::Built => {}
            TransactionExecutionState::Signed => {
                return Ok(Handling::event(Event::TransactionSigned {
                    operation_id,
                    transaction_id,
                }));
            }
            TransactionExecutionState::Failed => {
                return Ok(Handling::event(Event::TransactionExecutionFailed {
                    operation_id,
                    transaction_id,
                    error: tx.error.clone().unwrap_or_default(),
                    error_code: tx.error_code.unwrap_or(OperationErrorCode::Unknown),
                    lock_released: tx.lock_released,
                }));
            }
            _ => {
                debug!(%transaction_id, state = ?tx.state, "sign command out of phase, ignored");
                return Ok(Handling::done());
            }
        }

        let client = self.client(&tx.blockchain_type)?;
        let transaction_context = tx.transaction_context.clone().unwrap_or_default();
        match client
            .sign_transaction(transaction_id, &transaction_context)
            .await?
        {
            SignOutcome::Signed { signed_payload } => {
                tx.signed_payload = Some(signed_payload);
                tx.switch(TransactionExecutionState::Signed)?;
                self.transactions.save(&tx).await?;
                info!(%operation_id, %transaction_id, "transaction signed");
                Ok(Handling::event(Event::TransactionSigned {
                    operation_id,
                    transaction_id,
                }))
            }
            SignOutcome::Failed { reason } => {
                tx.error = Some(reason.clone());
                tx.error_code = Some(OperationErrorCode::SigningFailed);
                tx.switch(TransactionExecutionState::Failed)?;
                self.transactions.save(&tx).await?;
                warn!(%operation_id, %transaction_id, reason, "transaction signing failed");
                Ok(Handling::event(Event::TransactionExecutionFailed {
                    operation_id,
                    transaction_id,
                    error: reason,
                    error_code: OperationErrorCode::SigningFailed,
                    lock_released: false,
                }))
            }
        }
    }

    pub async fn broadcast_transaction(
        &self,
        operation_id: OperationId,
        transaction_id: TransactionId,
    ) -> Result<Handling, WorkflowError> {
        let mut tx = self.load(transaction_id).await?;

        match tx.state {
            TransactionExecutionState::Signed => {}
            TransactionExecutionState::Broadcasted => {
                return Ok(Handling::event(Event::TransactionBroadcasted {
                    operation_id,
                    transaction_id,
                }));
            }
            TransactionExecutionState::Failed => {
                return Ok(Handling::event(Event::TransactionExecutionFailed {
                    operation_id,
                    transaction_id,
                    error: tx.error.clone().unwrap_or_default(),
                    error_code: tx.error_code.unwrap_or(OperationErrorCode::Unknown),
                    lock_released: tx.lock_released,
                }));
            }
            TransactionExecutionState::RepeatRequested => {
                return Ok(Handling::event(Event::TransactionExecutionRepeatRequested {
                    operation_id,
                    transaction_id,
                    reason: tx.error.clone().unwrap_or_default(),
                    lock_released: tx.lock_released,
                }));
            }
            _ => {
                debug!(%transaction_id, state = ?tx.state, "broadcast command out of phase, ignored");
                return Ok(Handling::done());
            }
        }

        let client = self.client(&tx.blockchain_type)?;
        let signed_payload = tx.signed_payload.clone().unwrap_or_default();
        let outcome = client
            .broadcast_transaction(transaction_id, &signed_payload)
            .await?;

        match outcome {
            BroadcastOutcome::Accepted | BroadcastOutcome::AlreadyBroadcasted => {
                if matches!(outcome, BroadcastOutcome::AlreadyBroadcasted) {
                    info!(%transaction_id, "API reports transaction already broadcasted");
                }
                tx.broadcasted = true;
                tx.switch(TransactionExecutionState::Broadcasted)?;
                self.transactions.save(&tx).await?;
                info!(%operation_id, %transaction_id, "transaction broadcasted");
                Ok(Handling::event(Event::TransactionBroadcasted {
                    operation_id,
                    transaction_id,
                }))
            }
            BroadcastOutcome::Rejected { reason } => {
                tx.error = Some(reason.clone());
                tx.error_code = Some(OperationErrorCode::BroadcastingFailed);
                tx.switch(TransactionExecutionState::Failed)?;
                self.transactions.save(&tx).await?;
                warn!(%operation_id, %transaction_id, reason, "transaction broadcasting rejected");
                Ok(Handling::event(Event::TransactionExecutionFailed {
                    operation_id,
                    transaction_id,
                    error: reason,
                    error_code: OperationErrorCode::BroadcastingFailed,
                    lock_released: false,
                }))
            }
            BroadcastOutcome::RebuildRequired { reason } => {
                tx.error = Some(reason.clone());
                tx.switch(TransactionExecutionState::RepeatRequested)?;
                self.transactions.save(&tx).await?;
                warn!(%operation_id, %transaction_id, reason, "broadcast requires a rebuilt transaction");
                Ok(Handling::event(Event::TransactionExecutionRepeatRequested {
                    operation_id,
                    transaction_id,
                    reason,
                    lock_released: false,
                }))
            }
            BroadcastOutcome::TransientFailure { reason } => Err(WorkflowError::Api(
                crate::blockchain::ApiError::Transport(reason),
            )),
        }
    }

    pub async fn wait_for_transaction_ending(
        &self,
        operation_id: OperationId,
        transaction_id: TransactionId,
    ) -> Result<Handling, WorkflowError> {
        let mut tx = self.load(transaction_id).await?;

        match tx.state {
            TransactionExecutionState::SourceAddressLockReleased => {}
            TransactionExecutionState::Completed => {
                return Ok(Handling::event(Self::completed_event(&tx)));
            }
            TransactionExecutionState::Failed => {
                return Ok(Handling::event(Event::TransactionExecutionFailed {
                    operation_id,
                    transaction_id,
                    error: tx.error.clone().unwrap_or_default(),
                    error_code: tx.error_code.unwrap_or(OperationErrorCode::Unknown),
                    lock_released: tx.lock_released,
                }));
            }
            TransactionExecutionState::RepeatRequested => {
                return Ok(Handling::event(Event::TransactionExecutionRepeatRequested {
                    operation_id,
                    transaction_id,
                    reason: tx.error.clone().unwrap_or_default(),
                    lock_released: tx.lock_released,
                }));
            }
            _ => {
                debug!(%transaction_id, state = ?tx.state, "wait command out of phase, ignored");
                return Ok(Handling::done());
            }
        }

        let client = self.client(&tx.blockchain_type)?;
        match client.get_confirmation_status(transaction_id).await? {
            ConfirmationStatus::Pending => {
                let reason = if tx.attempt > 1 {
                    RetryReason::RebuildingConfirmationCheck
                } else {
                    RetryReason::WaitForTransactionEnding
                };
                Ok(Handling::retry(reason))
            }
            ConfirmationStatus::Confirmed {
                transaction_hash,
                block,
                fee,
                outputs,
            } => {
                tx.transaction_hash = Some(transaction_hash);
                tx.block = Some(block);
                tx.fee = Some(fee);
                tx.switch(TransactionExecutionState::Completed)?;
                self.transactions.save(&tx).await?;
                info!(
                    %operation_id,
                    %transaction_id,
                    transaction_hash = %tx.transaction_hash.as_deref().unwrap_or(""),
                    block,
                    "transaction confirmed on chain"
                );
                let mut event = Self::completed_event(&tx);
                if let Event::TransactionExecutionCompleted {
                    outputs: event_outputs,
                    ..
                } = &mut event
                {
                    if !outputs.is_empty() {
                        *event_outputs = outputs;
                    }
                }
                Ok(Handling::event(event))
            }
            ConfirmationStatus::Failed { error, repeatable } => {
                tx.error = Some(error.clone());
                if repeatable {
                    tx.switch(TransactionExecutionState::RepeatRequested)?;
                    self.transactions.save(&tx).await?;
                    warn!(%operation_id, %transaction_id, error, "transaction ended, repeat requested");
                    Ok(Handling::event(Event::TransactionExecutionRepeatRequested {
                        operation_id,
                        transaction_id,
                        reason: error,
                        lock_released: true,
                    }))
                } else {
                    tx.error_code = Some(OperationErrorCode::OnChainFailure);
                    tx.switch(TransactionExecutionState::Failed)?;
                    self.transactions.save(&tx).await?;
                    warn!(%operation_id, %transaction_id, error, "transaction failed on chain");
                    Ok(Handling::event(Event::TransactionExecutionFailed {
                        operation_id,
                        transaction_id,
                        error,
                        error_code: OperationErrorCode::OnChainFailure,
                        lock_released: true,
                    }))
                }
            }
        }
    }

    fn completed_event(tx: &TransactionExecution) -> Event {
        Event::TransactionExecutionCompleted {
            operation_id: tx.operation_id,
            transaction_id: tx.transaction_id,
            transaction_hash: tx.transaction_hash.clone().unwrap_or_default(),
            block: tx.block.unwrap_or_default(),
            fee: tx.fee.unwrap_or_default(),
            outputs: tx.outputs.clone(),
        }
    }

    pub async fn release_source_address_lock(
        &self,
        operation_id: OperationId,
        transaction_id: TransactionId,
    ) -> Result<Handling, WorkflowError> {
        let mut tx = self.load(transaction_id).await?;

        if tx.lock_released {
            return Ok(Handling::event(Event::SourceAddressLockReleased {
                operation_id,
                transaction_id,
                broadcasted: tx.broadcasted,
            }));
        }

        let client = self.client(&tx.blockchain_type)?;
        client.release_lock(&tx.from_address, transaction_id).await?;
        tx.lock_released = true;
        tx.switch(TransactionExecutionState::SourceAddressLockReleased)?;
        self.transactions.save(&tx).await?;
        info!(%operation_id, %transaction_id, address = %tx.from_address, "source address lock released");
        Ok(Handling::event(Event::SourceAddressLockReleased {
            operation_id,
            transaction_id,
            broadcasted: tx.broadcasted,
        }))
    }

    pub async fn clear_broadcasted_transaction(
        &self,
        operation_id: OperationId,
        transaction_id: TransactionId,
    ) -> Result<Handling, WorkflowError> {
        let Some(mut tx) = self.transactions.load(transaction_id).await? else {
            debug!(%transaction_id, "clear for unknown transaction, ignored");
            return Ok(Handling::done());
        };

        if tx.state == TransactionExecutionState::Cleared {
            return Ok(Handling::event(Event::BroadcastedTransactionCleared {
                operation_id,
                transaction_id,
            }));
        }

        if tx.broadcasted {
            let client = self.client(&tx.blockchain_type)?;
            client.forget_broadcasted(transaction_id).await?;
        }
        tx.switch(TransactionExecutionState::Cleared)?;
        self.transactions.save(&tx).await?;
        info!(%operation_id, %transaction_id, "broadcasted transaction cleared");
        Ok(Handling::event(Event::BroadcastedTransactionCleared {
            operation_id,
            transaction_id,
        }))
    }
}
