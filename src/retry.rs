//! Retry delay policy.
//!
//! Pure configuration lookup from a failure category to the delay before the
//! command is re-delivered. No state, no side effects; handlers report the
//! category and the dispatch boundary schedules the re-delivery.

use std::time::Duration;

use crate::config::RetrySettings;

/// Why a command needs to be re-delivered later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    /// Source address is locked by another in-flight transaction.
    SourceAddressLocking,
    /// Broadcasted transaction has not reached a terminal chain state yet.
    WaitForTransactionEnding,
    /// Balance is temporarily insufficient to build the transaction.
    NotEnoughBalance,
    /// Confirmation poll for a rebuilt (repeat) attempt.
    RebuildingConfirmationCheck,
}

/// Maps a [`RetryReason`] to the configured re-delivery delay.
#[derive(Debug, Clone)]
pub struct RetryDelayProvider {
    source_address_locking: Duration,
    wait_for_transaction_ending: Duration,
    not_enough_balance: Duration,
    rebuilding_confirmation_check: Duration,
}

impl RetryDelayProvider {
    pub fn new(
        source_address_locking: Duration,
        wait_for_transaction_ending: Duration,
        not_enough_balance: Duration,
        rebuilding_confirmation_check: Duration,
    ) -> Self {
        Self {
            source_address_locking,
            wait_for_transaction_ending,
            not_enough_balance,
            rebuilding_confirmation_check,
        }
    }

    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self::new(
            Duration::from_millis(settings.source_address_locking_ms),
            Duration::from_millis(settings.wait_for_transaction_ending_ms),
            Duration::from_millis(settings.not_enough_balance_ms),
            Duration::from_millis(settings.rebuilding_confirmation_check_ms),
        )
    }

    pub fn delay_for(&self, reason: RetryReason) -> Duration {
        match reason {
            RetryReason::SourceAddressLocking => self.source_address_locking,
            RetryReason::WaitForTransactionEnding => self.wait_for_transaction_ending,
            RetryReason::NotEnoughBalance => self.not_enough_balance,
            RetryReason::RebuildingConfirmationCheck => self.rebuilding_confirmation_check,
        }
    }
}
