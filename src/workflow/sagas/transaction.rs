//! Transaction-level process manager.
//!
//! Pure mapping from transaction events to the next commands. All state
//! lives in the aggregates; the mapping only needs the event payload, which
//! carries the `lock_released` and `broadcasted` flags so cleanup routing
//! never has to look anything up.

use crate::dispatch::Route;
use crate::messages::{Command, Event};

pub fn handle(event: &Event) -> Vec<(Route, Command)> {
    let to_executor = |command: Command| vec![(Route::TransactionsExecutor, command)];

    match event {
        Event::TransactionExecutionStarted {
            operation_id,
            transaction_id,
        } => to_executor(Command::LockSourceAddress {
            operation_id: *operation_id,
            transaction_id: *transaction_id,
        }),
        Event::SourceAddressLocked {
            operation_id,
            transaction_id,
        } => to_executor(Command::BuildTransaction {
            operation_id: *operation_id,
            transaction_id: *transaction_id,
        }),
        Event::TransactionBuilt {
            operation_id,
            transaction_id,
            ..
        } => to_executor(Command::SignTransaction {
            operation_id: *operation_id,
            transaction_id: *transaction_id,
        }),
        Event::TransactionBuildingRejected {
            operation_id,
            transaction_id,
            ..
        } => to_executor(Command::ReleaseSourceAddressLock {
            operation_id: *operation_id,
            transaction_id: *transaction_id,
        }),
        Event::TransactionSigned {
            operation_id,
            transaction_id,
        } => to_executor(Command::BroadcastTransaction {
            operation_id: *operation_id,
            transaction_id: *transaction_id,
        }),
        Event::TransactionBroadcasted {
            operation_id,
            transaction_id,
        } => to_executor(Command::ReleaseSourceAddressLock {
            operation_id: *operation_id,
            transaction_id: *transaction_id,
        }),
        Event::TransactionExecutionFailed {
            operation_id,
            transaction_id,
            lock_released,
            ..
        }
        | Event::TransactionExecutionRepeatRequested {
            operation_id,
            transaction_id,
            lock_released,
            ..
        } => {
            // Failures before the release still owe the lock back.
            let command = if *lock_released {
                Command::ClearBroadcastedTransaction {
                    operation_id: *operation_id,
                    transaction_id: *transaction_id,
                }
            } else {
                Command::ReleaseSourceAddressLock {
                    operation_id: *operation_id,
                    transaction_id: *transaction_id,
                }
            };
            to_executor(command)
        }
        Event::SourceAddressLockReleased {
            operation_id,
            transaction_id,
            broadcasted,
        } => {
            let command = if *broadcasted {
                Command::WaitForTransactionEnding {
                    operation_id: *operation_id,
                    transaction_id: *transaction_id,
                }
            } else {
                Command::ClearBroadcastedTransaction {
                    operation_id: *operation_id,
                    transaction_id: *transaction_id,
                }
            };
            to_executor(command)
        }
        Event::TransactionExecutionCompleted {
            operation_id,
            transaction_id,
            ..
        } => to_executor(Command::ClearBroadcastedTransaction {
            operation_id: *operation_id,
            transaction_id: *transaction_id,
        }),
        // Cleared ends the attempt; everything else belongs to the
        // operation-level process manager.
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::{OperationId, TransactionId};

    fn ids() -> (OperationId, TransactionId) {
        let operation_id = OperationId::new();
        (operation_id, TransactionId::derive(operation_id, 1))
    }

    #[test]
    fn happy_path_chains_the_five_steps() {
        let (operation_id, transaction_id) = ids();

        let steps = [
            Event::TransactionExecutionStarted {
                operation_id,
                transaction_id,
            },
            Event::SourceAddressLocked {
                operation_id,
                transaction_id,
            },
            Event::TransactionBuilt {
                operation_id,
                transaction_id,
                transaction_context: "ctx".to_string(),
            },
            Event::TransactionSigned {
                operation_id,
                transaction_id,
            },
            Event::TransactionBroadcasted {
                operation_id,
                transaction_id,
            },
        ];

        let names: Vec<&str> = steps
            .iter()
            .map(|event| handle(event)[0].1.name())
            .collect();
        assert_eq!(
            names,
            vec![
                "LockSourceAddress",
                "BuildTransaction",
                "SignTransaction",
                "BroadcastTransaction",
                "ReleaseSourceAddressLock",
            ]
        );
    }

    #[test]
    fn release_routing_depends_on_broadcast_flag() {
        let (operation_id, transaction_id) = ids();

        let after_broadcast = handle(&Event::SourceAddressLockReleased {
            operation_id,
            transaction_id,
            broadcasted: true,
        });
        assert_eq!(after_broadcast[0].1.name(), "WaitForTransactionEnding");

        let without_broadcast = handle(&Event::SourceAddressLockReleased {
            operation_id,
            transaction_id,
            broadcasted: false,
        });
        assert_eq!(
            without_broadcast[0].1.name(),
            "ClearBroadcastedTransaction"
        );
    }

    #[test]
    fn failure_before_release_goes_through_the_release_step() {
        let (operation_id, transaction_id) = ids();

        let before = handle(&Event::TransactionExecutionFailed {
            operation_id,
            transaction_id,
            error: "signing failed".to_string(),
            error_code: crate::messages::OperationErrorCode::SigningFailed,
            lock_released: false,
        });
        assert_eq!(before[0].1.name(), "ReleaseSourceAddressLock");

        let after = handle(&Event::TransactionExecutionFailed {
            operation_id,
            transaction_id,
            error: "reverted".to_string(),
            error_code: crate::messages::OperationErrorCode::OnChainFailure,
            lock_released: true,
        });
        assert_eq!(after[0].1.name(), "ClearBroadcastedTransaction");
    }

    #[test]
    fn cleared_attempt_produces_no_further_commands() {
        let (operation_id, transaction_id) = ids();
        assert!(
            handle(&Event::BroadcastedTransactionCleared {
                operation_id,
                transaction_id,
            })
            .is_empty()
        );
    }
}
