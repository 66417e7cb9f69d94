//! ChainOps Executor - Blockchain Operation Orchestration
//!
//! Executes blockchain transactions for a higher-level ledger as coordinated,
//! retryable steps. Every operation runs through two cooperating state
//! machines (the operation and its current transaction attempt) driven by
//! pure process managers over bounded execution contexts, with exactly one
//! terminal outcome per operation.
//!
//! # Modules
//!
//! - [`core_types`] - Identifier types (OperationId, TransactionId, ...)
//! - [`config`] - YAML application configuration
//! - [`logging`] - tracing subscriber setup
//! - [`state_machine`] - Declarative transition tables
//! - [`retry`] - Failure-category retry delay policy
//! - [`messages`] - Command and event catalog
//! - [`domain`] - Operation and transaction aggregates plus storage
//! - [`blockchain`] - Integration API boundary (and the scriptable mock)
//! - [`dispatch`] - Bounded worker pools and cancellation fences
//! - [`workflow`] - Command handlers, process managers and the engine

pub mod core_types;

pub mod config;
pub mod logging;

pub mod blockchain;
pub mod dispatch;
pub mod domain;
pub mod messages;
pub mod retry;
pub mod state_machine;
pub mod workflow;

// Convenient re-exports at crate root
pub use blockchain::{BlockchainApiClient, BlockchainApiClientProvider};
pub use config::AppConfig;
pub use core_types::{BlockchainType, OperationId, TransactionId, TransactionOutput};
pub use dispatch::{Dispatcher, Route};
pub use messages::{Command, Event, OperationErrorCode};
pub use retry::{RetryDelayProvider, RetryReason};
pub use workflow::{ExecutionEngine, WorkflowError};
