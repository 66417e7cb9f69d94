//! Workflow aggregates and their persistence seam.

pub mod operation;
pub mod store;
pub mod transaction;

pub use operation::{OperationExecution, OperationExecutionState};
pub use store::{Aggregate, AggregateStore, InMemoryStore, StoreError};
pub use transaction::{TransactionExecution, TransactionExecutionState};
