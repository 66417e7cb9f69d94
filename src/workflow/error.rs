use thiserror::Error;

use crate::blockchain::ApiError;
use crate::domain::operation::OperationExecutionState;
use crate::domain::store::StoreError;
use crate::domain::transaction::TransactionExecutionState;
use crate::state_machine::TransitionError;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("aggregate not found: {0}")]
    AggregateNotFound(String),
    #[error("no API client registered for blockchain type {0}")]
    UnknownBlockchainType(String),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("operation execution: {0}")]
    InvalidOperationTransition(#[from] TransitionError<OperationExecutionState>),
    #[error("transaction execution: {0}")]
    InvalidTransactionTransition(#[from] TransitionError<TransactionExecutionState>),
}

impl WorkflowError {
    /// Consistency violations indicate broken ordering or dedup upstream.
    /// Retrying them cannot help; the delivery is dropped and logged.
    pub fn is_consistency_violation(&self) -> bool {
        matches!(
            self,
            WorkflowError::InvalidOperationTransition(_)
                | WorkflowError::InvalidTransactionTransition(_)
                | WorkflowError::AggregateNotFound(_)
                | WorkflowError::UnknownBlockchainType(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_rejections_are_consistency_violations() {
        let err = WorkflowError::InvalidOperationTransition(TransitionError {
            from: OperationExecutionState::Started,
            to: OperationExecutionState::Completed,
        });
        assert!(err.is_consistency_violation());

        let err = WorkflowError::Api(ApiError::Transport("timeout".to_string()));
        assert!(!err.is_consistency_violation(), "transport errors retry");
    }
}
