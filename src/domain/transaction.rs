//! Transaction-attempt aggregate.
//!
//! One `TransactionExecution` covers exactly one build/sign/broadcast attempt.
//! Whatever way the attempt ends, the source address lock is released before
//! the attempt reaches a resting state, and every resting state funnels into
//! `Cleared` so the broadcasted payload is forgotten on the integration side.

use chrono::Utc;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::core_types::{BlockchainType, OperationId, TransactionId, TransactionOutput};
use crate::domain::store::Aggregate;
use crate::messages::OperationErrorCode;
use crate::state_machine::{SwitchableState, TransitionError, TransitionTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionExecutionState {
    Started,
    SourceAddressLocked,
    Built,
    BuildingRejected,
    Signed,
    Broadcasted,
    Failed,
    RepeatRequested,
    SourceAddressLockReleased,
    Completed,
    Cleared,
}

static TRANSACTION_TRANSITIONS: Lazy<TransitionTable<TransactionExecutionState>> =
    Lazy::new(|| {
        use TransactionExecutionState::*;
        TransitionTable::builder()
            .allow(Started, SourceAddressLocked)
            .allow(SourceAddressLocked, Built)
            .allow(SourceAddressLocked, BuildingRejected)
            .allow(Built, Signed)
            .allow(Built, Failed)
            .allow(Signed, Broadcasted)
            .allow(Signed, Failed)
            .allow(Signed, RepeatRequested)
            .allow(Broadcasted, SourceAddressLockReleased)
            .allow(BuildingRejected, SourceAddressLockReleased)
            .allow(Failed, SourceAddressLockReleased)
            .allow(RepeatRequested, SourceAddressLockReleased)
            .allow(SourceAddressLockReleased, Completed)
            .allow(SourceAddressLockReleased, Failed)
            .allow(SourceAddressLockReleased, RepeatRequested)
            .allow(SourceAddressLockReleased, Cleared)
            .allow(Completed, Cleared)
            .allow(Failed, Cleared)
            .allow(RepeatRequested, Cleared)
            .build()
    });

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionExecution {
    pub transaction_id: TransactionId,
    pub operation_id: OperationId,
    pub attempt: u32,
    pub blockchain_type: BlockchainType,
    pub asset_id: String,
    pub from_address: String,
    pub outputs: Vec<TransactionOutput>,
    /// Opaque integration payload produced by the build step.
    pub transaction_context: Option<String>,
    pub signed_payload: Option<String>,
    pub broadcasted: bool,
    pub lock_released: bool,
    pub transaction_hash: Option<String>,
    pub block: Option<u64>,
    pub fee: Option<u64>,
    pub error: Option<String>,
    pub error_code: Option<OperationErrorCode>,
    pub state: TransactionExecutionState,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TransactionExecution {
    pub fn start(
        transaction_id: TransactionId,
        operation_id: OperationId,
        attempt: u32,
        blockchain_type: BlockchainType,
        asset_id: String,
        from_address: String,
        outputs: Vec<TransactionOutput>,
    ) -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            transaction_id,
            operation_id,
            attempt,
            blockchain_type,
            asset_id,
            from_address,
            outputs,
            transaction_context: None,
            signed_payload: None,
            broadcasted: false,
            lock_released: false,
            transaction_hash: None,
            block: None,
            fee: None,
            error: None,
            error_code: None,
            state: TransactionExecutionState::Started,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn switch(
        &mut self,
        to: TransactionExecutionState,
    ) -> Result<(), TransitionError<TransactionExecutionState>> {
        TRANSACTION_TRANSITIONS.switch(self, to)?;
        self.updated_at = Utc::now().timestamp_millis();
        Ok(())
    }

    pub fn can_switch(&self, to: TransactionExecutionState) -> bool {
        TRANSACTION_TRANSITIONS.can_switch(self.state, to)
    }
}

impl SwitchableState for TransactionExecution {
    type State = TransactionExecutionState;

    fn state(&self) -> TransactionExecutionState {
        self.state
    }

    fn set_state(&mut self, state: TransactionExecutionState) {
        self.state = state;
    }
}

impl Aggregate for TransactionExecution {
    type Id = TransactionId;

    fn id(&self) -> TransactionId {
        self.transaction_id
    }
}
