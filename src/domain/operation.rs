//! Operation-level aggregate.
//!
//! Tracks the whole lifetime of a client-requested transfer across however
//! many transaction attempts it takes. At most one transaction attempt is
//! active at a time; restarting an attempt goes through the
//! `ActiveTransactionCleared` state so the previous id is detached before a
//! new one is generated.

use chrono::Utc;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::core_types::{BlockchainType, OperationId, TransactionId, TransactionOutput};
use crate::domain::store::Aggregate;
use crate::messages::OperationErrorCode;
use crate::state_machine::{SwitchableState, TransitionError, TransitionTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationExecutionState {
    Started,
    ActiveTransactionIdGenerated,
    TransactionExecutionInProgress,
    ActiveTransactionCleared,
    Completed,
    Failed,
}

impl OperationExecutionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

static OPERATION_TRANSITIONS: Lazy<TransitionTable<OperationExecutionState>> = Lazy::new(|| {
    use OperationExecutionState::*;
    TransitionTable::builder()
        .allow(Started, ActiveTransactionIdGenerated)
        .allow(ActiveTransactionIdGenerated, TransactionExecutionInProgress)
        .allow(TransactionExecutionInProgress, ActiveTransactionCleared)
        .allow(TransactionExecutionInProgress, Completed)
        .allow(TransactionExecutionInProgress, Failed)
        .allow(ActiveTransactionCleared, ActiveTransactionIdGenerated)
        .allow(ActiveTransactionCleared, Failed)
        .build()
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationExecution {
    pub operation_id: OperationId,
    pub blockchain_type: BlockchainType,
    pub asset_id: String,
    pub from_address: String,
    pub outputs: Vec<TransactionOutput>,
    /// Completion event shape differs for one-to-many transfers.
    pub one_to_many: bool,
    pub active_transaction_id: Option<TransactionId>,
    /// Number of transaction ids generated so far.
    pub attempt_count: u32,
    pub state: OperationExecutionState,
    pub error: Option<String>,
    pub error_code: Option<OperationErrorCode>,
    pub transaction_hash: Option<String>,
    pub block: Option<u64>,
    pub fee: Option<u64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl OperationExecution {
    pub fn start(
        operation_id: OperationId,
        blockchain_type: BlockchainType,
        asset_id: String,
        from_address: String,
        outputs: Vec<TransactionOutput>,
        one_to_many: bool,
    ) -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            operation_id,
            blockchain_type,
            asset_id,
            from_address,
            outputs,
            one_to_many,
            active_transaction_id: None,
            attempt_count: 0,
            state: OperationExecutionState::Started,
            error: None,
            error_code: None,
            transaction_hash: None,
            block: None,
            fee: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn switch(
        &mut self,
        to: OperationExecutionState,
    ) -> Result<(), TransitionError<OperationExecutionState>> {
        OPERATION_TRANSITIONS.switch(self, to)?;
        self.updated_at = Utc::now().timestamp_millis();
        Ok(())
    }

    pub fn can_switch(&self, to: OperationExecutionState) -> bool {
        OPERATION_TRANSITIONS.can_switch(self.state, to)
    }
}

impl SwitchableState for OperationExecution {
    type State = OperationExecutionState;

    fn state(&self) -> OperationExecutionState {
        self.state
    }

    fn set_state(&mut self, state: OperationExecutionState) {
        self.state = state;
    }
}

impl Aggregate for OperationExecution {
    type Id = OperationId;

    fn id(&self) -> OperationId {
        self.operation_id
    }
}
