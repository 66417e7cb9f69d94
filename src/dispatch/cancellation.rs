//! Message cancellation fences.
//!
//! Every message carries its operation id as correlation key. The registry
//! keeps one fence per `(route, operation)` for as long as the operation is
//! live; once the operation has settled the fences are forgotten and any
//! late delivery (a scheduled retry, an in-flight tail event) is refused at
//! admission instead of reaching a handler. Staleness *within* a live
//! operation is not judged here: the aggregates' state matching absorbs
//! out-of-phase commands, which is keyed to the actual aggregate version
//! rather than to message identities.

use dashmap::DashMap;

use crate::core_types::OperationId;
use crate::dispatch::Route;

#[derive(Debug, Default, Clone, Copy)]
struct Fence {
    issued: u64,
}

#[derive(Default)]
pub struct CancellationRegistry {
    fences: DashMap<(Route, OperationId), Fence>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue the next sequence number for a fresh message on the route,
    /// opening the fence if the operation is new to it.
    pub fn next_sequence(&self, route: Route, operation_id: OperationId) -> u64 {
        let mut entry = self.fences.entry((route, operation_id)).or_default();
        entry.issued += 1;
        entry.issued
    }

    /// Issue a sequence number only while the operation is still fenced.
    /// Returns `None` once the operation has been forgotten, so re-delivery
    /// loops die out instead of resurrecting the fence.
    pub fn try_next_sequence(&self, route: Route, operation_id: OperationId) -> Option<u64> {
        let mut entry = self.fences.get_mut(&(route, operation_id))?;
        entry.issued += 1;
        Some(entry.issued)
    }

    /// Admit a delivery. Traffic of a forgotten operation is refused.
    pub fn admit(&self, route: Route, operation_id: OperationId) -> bool {
        self.fences.contains_key(&(route, operation_id))
    }

    /// Drop all fences of a settled operation.
    pub fn forget(&self, operation_id: OperationId) {
        for route in Route::ALL {
            self.fences.remove(&(route, operation_id));
        }
    }

    pub fn tracked_operations(&self) -> usize {
        self.fences.len()
    }
}
