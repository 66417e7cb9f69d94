//! Command and event catalog of the execution workflow.
//!
//! Payloads carry identifiers plus the minimal context the next step needs;
//! everything else lives in the aggregates. Every message exposes its
//! `OperationId`, the correlation key used for routing, per-key ordering
//! and cancellation fencing.

use serde::{Deserialize, Serialize};

use crate::core_types::{BlockchainType, OperationId, TransactionId, TransactionOutput};

/// Error classification surfaced on terminal failure events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationErrorCode {
    Unknown,
    SigningFailed,
    BroadcastingFailed,
    OnChainFailure,
    RebuildingRejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Command {
    StartOperationExecution {
        operation_id: OperationId,
        blockchain_type: BlockchainType,
        asset_id: String,
        from_address: String,
        to_address: String,
        amount: u64,
    },
    StartOneToManyOutputsExecution {
        operation_id: OperationId,
        blockchain_type: BlockchainType,
        asset_id: String,
        from_address: String,
        outputs: Vec<TransactionOutput>,
    },
    GenerateActiveTransactionId {
        operation_id: OperationId,
    },
    ClearActiveTransaction {
        operation_id: OperationId,
    },
    NotifyOperationExecutionCompleted {
        operation_id: OperationId,
        transaction_id: TransactionId,
        transaction_hash: String,
        block: u64,
        fee: u64,
        outputs: Vec<TransactionOutput>,
    },
    NotifyOperationExecutionFailed {
        operation_id: OperationId,
        transaction_id: Option<TransactionId>,
        error: String,
        error_code: OperationErrorCode,
    },
    StartTransactionExecution {
        operation_id: OperationId,
        transaction_id: TransactionId,
        attempt: u32,
        blockchain_type: BlockchainType,
        asset_id: String,
        from_address: String,
        outputs: Vec<TransactionOutput>,
    },
    LockSourceAddress {
        operation_id: OperationId,
        transaction_id: TransactionId,
    },
    BuildTransaction {
        operation_id: OperationId,
        transaction_id: TransactionId,
    },
    SignTransaction {
        operation_id: OperationId,
        transaction_id: TransactionId,
    },
    BroadcastTransaction {
        operation_id: OperationId,
        transaction_id: TransactionId,
    },
    WaitForTransactionEnding {
        operation_id: OperationId,
        transaction_id: TransactionId,
    },
    ReleaseSourceAddressLock {
        operation_id: OperationId,
        transaction_id: TransactionId,
    },
    ClearBroadcastedTransaction {
        operation_id: OperationId,
        transaction_id: TransactionId,
    },
}

impl Command {
    /// Correlation key of the message.
    pub fn operation_id(&self) -> OperationId {
        match self {
            Command::StartOperationExecution { operation_id, .. }
            | Command::StartOneToManyOutputsExecution { operation_id, .. }
            | Command::GenerateActiveTransactionId { operation_id }
            | Command::ClearActiveTransaction { operation_id }
            | Command::NotifyOperationExecutionCompleted { operation_id, .. }
            | Command::NotifyOperationExecutionFailed { operation_id, .. }
            | Command::StartTransactionExecution { operation_id, .. }
            | Command::LockSourceAddress { operation_id, .. }
            | Command::BuildTransaction { operation_id, .. }
            | Command::SignTransaction { operation_id, .. }
            | Command::BroadcastTransaction { operation_id, .. }
            | Command::WaitForTransactionEnding { operation_id, .. }
            | Command::ReleaseSourceAddressLock { operation_id, .. }
            | Command::ClearBroadcastedTransaction { operation_id, .. } => *operation_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::StartOperationExecution { .. } => "StartOperationExecution",
            Command::StartOneToManyOutputsExecution { .. } => "StartOneToManyOutputsExecution",
            Command::GenerateActiveTransactionId { .. } => "GenerateActiveTransactionId",
            Command::ClearActiveTransaction { .. } => "ClearActiveTransaction",
            Command::NotifyOperationExecutionCompleted { .. } => {
                "NotifyOperationExecutionCompleted"
            }
            Command::NotifyOperationExecutionFailed { .. } => "NotifyOperationExecutionFailed",
            Command::StartTransactionExecution { .. } => "StartTransactionExecution",
            Command::LockSourceAddress { .. } => "LockSourceAddress",
            Command::BuildTransaction { .. } => "BuildTransaction",
            Command::SignTransaction { .. } => "SignTransaction",
            Command::BroadcastTransaction { .. } => "BroadcastTransaction",
            Command::WaitForTransactionEnding { .. } => "WaitForTransactionEnding",
            Command::ReleaseSourceAddressLock { .. } => "ReleaseSourceAddressLock",
            Command::ClearBroadcastedTransaction { .. } => "ClearBroadcastedTransaction",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OperationExecutionStarted {
        operation_id: OperationId,
    },
    ActiveTransactionIdGenerated {
        operation_id: OperationId,
        transaction_id: TransactionId,
        attempt: u32,
        blockchain_type: BlockchainType,
        asset_id: String,
        from_address: String,
        outputs: Vec<TransactionOutput>,
    },
    /// Generating a fresh transaction id was refused: either the operation
    /// reached a terminal state concurrently, or the attempt budget ran out.
    TransactionRebuildingRejected {
        operation_id: OperationId,
        reason: String,
    },
    ActiveTransactionCleared {
        operation_id: OperationId,
    },
    TransactionExecutionStarted {
        operation_id: OperationId,
        transaction_id: TransactionId,
    },
    SourceAddressLocked {
        operation_id: OperationId,
        transaction_id: TransactionId,
    },
    TransactionBuilt {
        operation_id: OperationId,
        transaction_id: TransactionId,
        transaction_context: String,
    },
    TransactionBuildingRejected {
        operation_id: OperationId,
        transaction_id: TransactionId,
        reason: String,
    },
    TransactionSigned {
        operation_id: OperationId,
        transaction_id: TransactionId,
    },
    TransactionBroadcasted {
        operation_id: OperationId,
        transaction_id: TransactionId,
    },
    /// `broadcasted` tells the transaction saga whether to await the chain
    /// ending or to go straight to cleanup.
    SourceAddressLockReleased {
        operation_id: OperationId,
        transaction_id: TransactionId,
        broadcasted: bool,
    },
    TransactionExecutionCompleted {
        operation_id: OperationId,
        transaction_id: TransactionId,
        transaction_hash: String,
        block: u64,
        fee: u64,
        outputs: Vec<TransactionOutput>,
    },
    /// `lock_released` disambiguates the cleanup path for the saga: failures
    /// before the lock release still need the release step.
    TransactionExecutionFailed {
        operation_id: OperationId,
        transaction_id: TransactionId,
        error: String,
        error_code: OperationErrorCode,
        lock_released: bool,
    },
    TransactionExecutionRepeatRequested {
        operation_id: OperationId,
        transaction_id: TransactionId,
        reason: String,
        lock_released: bool,
    },
    BroadcastedTransactionCleared {
        operation_id: OperationId,
        transaction_id: TransactionId,
    },
    OperationExecutionCompleted {
        operation_id: OperationId,
        transaction_id: TransactionId,
        transaction_hash: String,
        block: u64,
        fee: u64,
    },
    OneToManyOperationExecutionCompleted {
        operation_id: OperationId,
        transaction_id: TransactionId,
        transaction_hash: String,
        block: u64,
        fee: u64,
        outputs: Vec<TransactionOutput>,
    },
    OperationExecutionFailed {
        operation_id: OperationId,
        transaction_id: Option<TransactionId>,
        error: String,
        error_code: OperationErrorCode,
    },
}

impl Event {
    /// Correlation key of the message.
    pub fn operation_id(&self) -> OperationId {
        match self {
            Event::OperationExecutionStarted { operation_id }
            | Event::ActiveTransactionIdGenerated { operation_id, .. }
            | Event::TransactionRebuildingRejected { operation_id, .. }
            | Event::ActiveTransactionCleared { operation_id }
            | Event::TransactionExecutionStarted { operation_id, .. }
            | Event::SourceAddressLocked { operation_id, .. }
            | Event::TransactionBuilt { operation_id, .. }
            | Event::TransactionBuildingRejected { operation_id, .. }
            | Event::TransactionSigned { operation_id, .. }
            | Event::TransactionBroadcasted { operation_id, .. }
            | Event::SourceAddressLockReleased { operation_id, .. }
            | Event::TransactionExecutionCompleted { operation_id, .. }
            | Event::TransactionExecutionFailed { operation_id, .. }
            | Event::TransactionExecutionRepeatRequested { operation_id, .. }
            | Event::BroadcastedTransactionCleared { operation_id, .. }
            | Event::OperationExecutionCompleted { operation_id, .. }
            | Event::OneToManyOperationExecutionCompleted { operation_id, .. }
            | Event::OperationExecutionFailed { operation_id, .. } => *operation_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Event::OperationExecutionStarted { .. } => "OperationExecutionStarted",
            Event::ActiveTransactionIdGenerated { .. } => "ActiveTransactionIdGenerated",
            Event::TransactionRebuildingRejected { .. } => "TransactionRebuildingRejected",
            Event::ActiveTransactionCleared { .. } => "ActiveTransactionCleared",
            Event::TransactionExecutionStarted { .. } => "TransactionExecutionStarted",
            Event::SourceAddressLocked { .. } => "SourceAddressLocked",
            Event::TransactionBuilt { .. } => "TransactionBuilt",
            Event::TransactionBuildingRejected { .. } => "TransactionBuildingRejected",
            Event::TransactionSigned { .. } => "TransactionSigned",
            Event::TransactionBroadcasted { .. } => "TransactionBroadcasted",
            Event::SourceAddressLockReleased { .. } => "SourceAddressLockReleased",
            Event::TransactionExecutionCompleted { .. } => "TransactionExecutionCompleted",
            Event::TransactionExecutionFailed { .. } => "TransactionExecutionFailed",
            Event::TransactionExecutionRepeatRequested { .. } => {
                "TransactionExecutionRepeatRequested"
            }
            Event::BroadcastedTransactionCleared { .. } => "BroadcastedTransactionCleared",
            Event::OperationExecutionCompleted { .. } => "OperationExecutionCompleted",
            Event::OneToManyOperationExecutionCompleted { .. } => {
                "OneToManyOperationExecutionCompleted"
            }
            Event::OperationExecutionFailed { .. } => "OperationExecutionFailed",
        }
    }

    /// Terminal, caller-visible outcome events of the operation contract.
    pub fn is_operation_terminal(&self) -> bool {
        matches!(
            self,
            Event::OperationExecutionCompleted { .. }
                | Event::OneToManyOperationExecutionCompleted { .. }
                | Event::OperationExecutionFailed { .. }
        )
    }
}

/// Either side of the workflow traffic, as carried by the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WorkflowMessage {
    Command(Command),
    Event(Event),
}

impl WorkflowMessage {
    pub fn operation_id(&self) -> OperationId {
        match self {
            WorkflowMessage::Command(command) => command.operation_id(),
            WorkflowMessage::Event(event) => event.operation_id(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            WorkflowMessage::Command(command) => command.name(),
            WorkflowMessage::Event(event) => event.name(),
        }
    }
}
