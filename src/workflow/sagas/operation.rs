//! Operation-level process manager.
//!
//! Drives the attempt loop: generate an id, hand the attempt to the
//! transaction context, and on a repeatable failure clear the active id so
//! the next generation starts a fresh attempt. Terminal notifications go
//! back to the operation executor exactly once per outcome.

use crate::dispatch::Route;
use crate::messages::{Command, Event, OperationErrorCode};

pub fn handle(event: &Event) -> Vec<(Route, Command)> {
    match event {
        Event::OperationExecutionStarted { operation_id } => vec![(
            Route::OperationsExecutor,
            Command::GenerateActiveTransactionId {
                operation_id: *operation_id,
            },
        )],
        Event::ActiveTransactionIdGenerated {
            operation_id,
            transaction_id,
            attempt,
            blockchain_type,
            asset_id,
            from_address,
            outputs,
        } => vec![(
            Route::TransactionsExecutor,
            Command::StartTransactionExecution {
                operation_id: *operation_id,
                transaction_id: *transaction_id,
                attempt: *attempt,
                blockchain_type: blockchain_type.clone(),
                asset_id: asset_id.clone(),
                from_address: from_address.clone(),
                outputs: outputs.clone(),
            },
        )],
        Event::TransactionRebuildingRejected {
            operation_id,
            reason,
        } => vec![(
            Route::OperationsExecutor,
            Command::NotifyOperationExecutionFailed {
                operation_id: *operation_id,
                transaction_id: None,
                error: reason.clone(),
                error_code: OperationErrorCode::RebuildingRejected,
            },
        )],
        Event::ActiveTransactionCleared { operation_id } => vec![(
            Route::OperationsExecutor,
            Command::GenerateActiveTransactionId {
                operation_id: *operation_id,
            },
        )],
        Event::TransactionExecutionCompleted {
            operation_id,
            transaction_id,
            transaction_hash,
            block,
            fee,
            outputs,
        } => vec![(
            Route::OperationsExecutor,
            Command::NotifyOperationExecutionCompleted {
                operation_id: *operation_id,
                transaction_id: *transaction_id,
                transaction_hash: transaction_hash.clone(),
                block: *block,
                fee: *fee,
                outputs: outputs.clone(),
            },
        )],
        Event::TransactionExecutionFailed {
            operation_id,
            transaction_id,
            error,
            error_code,
            ..
        } => vec![(
            Route::OperationsExecutor,
            Command::NotifyOperationExecutionFailed {
                operation_id: *operation_id,
                transaction_id: Some(*transaction_id),
                error: error.clone(),
                error_code: *error_code,
            },
        )],
        // Repeatable outcomes restart the attempt loop through clearing.
        Event::TransactionExecutionRepeatRequested { operation_id, .. }
        | Event::TransactionBuildingRejected { operation_id, .. } => vec![(
            Route::OperationsExecutor,
            Command::ClearActiveTransaction {
                operation_id: *operation_id,
            },
        )],
        _ => Vec::new(),
    }
}
