//! Scriptable in-memory blockchain API for tests and the mock profile.
//!
//! The lock table is real: contention between attempts behaves like the live
//! integration. Build/sign/broadcast/confirmation responses are scripted as
//! queues; when a queue runs dry the step falls back to its success default.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::blockchain::{
    ApiError, BlockchainApiClient, BroadcastOutcome, BuildOutcome, BuildRequest,
    ConfirmationStatus, LockOutcome, SignOutcome,
};
use crate::core_types::{TransactionId, TransactionOutput};

#[derive(Default)]
struct Scripts {
    build: VecDeque<BuildOutcome>,
    sign: VecDeque<SignOutcome>,
    broadcast: VecDeque<BroadcastOutcome>,
    confirmation: VecDeque<ConfirmationStatus>,
}

#[derive(Default)]
pub struct MockBlockchainApiClient {
    locks: Mutex<HashMap<String, TransactionId>>,
    scripts: Mutex<Scripts>,
    pub lock_attempts: AtomicUsize,
    pub lock_contentions: AtomicUsize,
    pub releases: AtomicUsize,
    pub builds: AtomicUsize,
    pub signs: AtomicUsize,
    pub broadcasts: AtomicUsize,
    pub confirmation_polls: AtomicUsize,
    pub forgets: AtomicUsize,
}

impl MockBlockchainApiClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_build(&self, outcome: BuildOutcome) {
        self.scripts.lock().unwrap().build.push_back(outcome);
    }

    pub fn script_sign(&self, outcome: SignOutcome) {
        self.scripts.lock().unwrap().sign.push_back(outcome);
    }

    pub fn script_broadcast(&self, outcome: BroadcastOutcome) {
        self.scripts.lock().unwrap().broadcast.push_back(outcome);
    }

    pub fn script_confirmation(&self, status: ConfirmationStatus) {
        self.scripts.lock().unwrap().confirmation.push_back(status);
    }

    pub fn held_locks(&self) -> usize {
        self.locks.lock().unwrap().len()
    }

    fn default_confirmation(transaction_id: TransactionId) -> ConfirmationStatus {
        ConfirmationStatus::Confirmed {
            transaction_hash: format!("0xmock-{transaction_id}"),
            block: 1_000,
            fee: 21,
            outputs: vec![TransactionOutput::new("mock-dest", 1)],
        }
    }
}

#[async_trait]
impl BlockchainApiClient for MockBlockchainApiClient {
    async fn lock_address(
        &self,
        address: &str,
        holder: TransactionId,
    ) -> Result<LockOutcome, ApiError> {
        self.lock_attempts.fetch_add(1, Ordering::SeqCst);
        let mut locks = self.locks.lock().unwrap();
        match locks.get(address) {
            Some(current) if *current != holder => {
                self.lock_contentions.fetch_add(1, Ordering::SeqCst);
                Ok(LockOutcome::HeldByOther)
            }
            _ => {
                locks.insert(address.to_string(), holder);
                Ok(LockOutcome::Acquired)
            }
        }
    }

    async fn release_lock(&self, address: &str, holder: TransactionId) -> Result<(), ApiError> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        let mut locks = self.locks.lock().unwrap();
        if locks.get(address) == Some(&holder) {
            locks.remove(address);
        }
        Ok(())
    }

    async fn build_transaction(&self, request: &BuildRequest) -> Result<BuildOutcome, ApiError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        let scripted = self.scripts.lock().unwrap().build.pop_front();
        Ok(scripted.unwrap_or_else(|| BuildOutcome::Built {
            transaction_context: format!("ctx-{}", request.transaction_id),
        }))
    }

    async fn sign_transaction(
        &self,
        transaction_id: TransactionId,
        _transaction_context: &str,
    ) -> Result<SignOutcome, ApiError> {
        self.signs.fetch_add(1, Ordering::SeqCst);
        let scripted = self.scripts.lock().unwrap().sign.pop_front();
        Ok(scripted.unwrap_or_else(|| SignOutcome::Signed {
            signed_payload: format!("signed-{transaction_id}"),
        }))
    }

    async fn broadcast_transaction(
        &self,
        _transaction_id: TransactionId,
        _signed_payload: &str,
    ) -> Result<BroadcastOutcome, ApiError> {
        self.broadcasts.fetch_add(1, Ordering::SeqCst);
        let scripted = self.scripts.lock().unwrap().broadcast.pop_front();
        Ok(scripted.unwrap_or(BroadcastOutcome::Accepted))
    }

    async fn get_confirmation_status(
        &self,
        transaction_id: TransactionId,
    ) -> Result<ConfirmationStatus, ApiError> {
        self.confirmation_polls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.scripts.lock().unwrap().confirmation.pop_front();
        Ok(scripted.unwrap_or_else(|| Self::default_confirmation(transaction_id)))
    }

    async fn forget_broadcasted(&self, _transaction_id: TransactionId) -> Result<(), ApiError> {
        self.forgets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
