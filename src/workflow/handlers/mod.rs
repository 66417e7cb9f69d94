//! Idempotent command handlers per execution context.

pub mod operation;
pub mod transaction;

pub use operation::OperationHandlers;
pub use transaction::TransactionHandlers;
