//! Process managers: pure event-to-command mappings per route.

pub mod operation;
pub mod transaction;
