//! Core identifier types shared by every module.
//!
//! `OperationId` is caller-supplied and stable for the whole lifetime of an
//! operation. `TransactionId` identifies one concrete build/sign/broadcast
//! attempt; a single operation may produce several of them when attempts are
//! restarted.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Caller-visible operation identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(Uuid);

impl OperationId {
    /// Generate a fresh random operation id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn inner(&self) -> Uuid {
        self.0
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for OperationId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OperationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::from_str(s)?))
    }
}

/// Identifier of one transaction attempt belonging to an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(Uuid);

impl TransactionId {
    /// Derive the attempt's id deterministically from the operation id and
    /// the attempt number, so a re-delivered generate command always yields
    /// the same id instead of minting a second live one.
    pub fn derive(operation_id: OperationId, attempt: u32) -> Self {
        Self(Uuid::new_v5(&operation_id.inner(), &attempt.to_be_bytes()))
    }

    pub fn inner(&self) -> Uuid {
        self.0
    }
}

impl From<Uuid> for TransactionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TransactionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::from_str(s)?))
    }
}

/// Key selecting the blockchain integration an operation runs against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockchainType(String);

impl BlockchainType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for BlockchainType {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl fmt::Display for BlockchainType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One destination of a transaction, in atomic units of the asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOutput {
    pub to_address: String,
    pub amount: u64,
}

impl TransactionOutput {
    pub fn new(to_address: impl Into<String>, amount: u64) -> Self {
        Self {
            to_address: to_address.into(),
            amount,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_ids_are_unique() {
        assert_ne!(OperationId::new(), OperationId::new());
    }

    #[test]
    fn transaction_id_derivation_is_deterministic() {
        let operation_id = OperationId::new();

        let first = TransactionId::derive(operation_id, 1);
        let again = TransactionId::derive(operation_id, 1);
        let second = TransactionId::derive(operation_id, 2);

        assert_eq!(first, again);
        assert_ne!(first, second);
    }

    #[test]
    fn transaction_ids_do_not_collide_across_operations() {
        let a = TransactionId::derive(OperationId::new(), 1);
        let b = TransactionId::derive(OperationId::new(), 1);
        assert_ne!(a, b);
    }

    #[test]
    fn id_display_round_trips() {
        let id = OperationId::new();
        let parsed: OperationId = id.to_string().parse().expect("valid uuid");
        assert_eq!(id, parsed);
    }
}
