//! Blockchain integration boundary.
//!
//! Each supported chain exposes the same six capabilities behind
//! [`BlockchainApiClient`]. Expected, routine outcomes (lock contention,
//! build rejection, pending confirmation) are tagged enum variants rather
//! than errors; `ApiError` is reserved for transport-level failures that the
//! dispatch layer retries blindly.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::core_types::{BlockchainType, OperationId, TransactionId, TransactionOutput};

#[cfg(feature = "mock-api")]
pub mod mock;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("blockchain API transport failure: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome {
    Acquired,
    HeldByOther,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    Built {
        /// Opaque context the signer and broadcaster need later.
        transaction_context: String,
    },
    /// Permanent refusal for this attempt; a fresh attempt may succeed.
    Rejected { reason: String },
    /// Temporary condition, typically insufficient confirmed balance.
    TransientFailure { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignOutcome {
    Signed { signed_payload: String },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastOutcome {
    Accepted,
    /// A previous delivery of the same payload already went out. Treated
    /// exactly like `Accepted`.
    AlreadyBroadcasted,
    Rejected { reason: String },
    /// The built payload went stale and the whole attempt must be redone.
    RebuildRequired { reason: String },
    TransientFailure { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationStatus {
    Pending,
    Confirmed {
        transaction_hash: String,
        block: u64,
        fee: u64,
        outputs: Vec<TransactionOutput>,
    },
    Failed {
        error: String,
        /// Whether a rebuilt attempt is worth trying.
        repeatable: bool,
    },
}

#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub operation_id: OperationId,
    pub transaction_id: TransactionId,
    pub asset_id: String,
    pub from_address: String,
    pub outputs: Vec<TransactionOutput>,
}

#[async_trait]
pub trait BlockchainApiClient: Send + Sync {
    /// Try to take the exclusive source address lock for the given attempt.
    /// Re-acquiring a lock already held by the same attempt succeeds.
    async fn lock_address(
        &self,
        address: &str,
        holder: TransactionId,
    ) -> Result<LockOutcome, ApiError>;

    async fn release_lock(&self, address: &str, holder: TransactionId) -> Result<(), ApiError>;

    async fn build_transaction(&self, request: &BuildRequest) -> Result<BuildOutcome, ApiError>;

    async fn sign_transaction(
        &self,
        transaction_id: TransactionId,
        transaction_context: &str,
    ) -> Result<SignOutcome, ApiError>;

    async fn broadcast_transaction(
        &self,
        transaction_id: TransactionId,
        signed_payload: &str,
    ) -> Result<BroadcastOutcome, ApiError>;

    async fn get_confirmation_status(
        &self,
        transaction_id: TransactionId,
    ) -> Result<ConfirmationStatus, ApiError>;

    /// Drop integration-side bookkeeping for a finished broadcast.
    async fn forget_broadcasted(&self, transaction_id: TransactionId) -> Result<(), ApiError>;
}

/// Registry of integration clients keyed by blockchain type.
#[derive(Default)]
pub struct BlockchainApiClientProvider {
    clients: HashMap<BlockchainType, Arc<dyn BlockchainApiClient>>,
}

impl BlockchainApiClientProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        blockchain_type: BlockchainType,
        client: Arc<dyn BlockchainApiClient>,
    ) {
        self.clients.insert(blockchain_type, client);
    }

    pub fn get(&self, blockchain_type: &BlockchainType) -> Option<Arc<dyn BlockchainApiClient>> {
        self.clients.get(blockchain_type).cloned()
    }
}
