//! Bounded execution contexts.
//!
//! Each route owns a fixed pool of workers over bounded queues. A message is
//! assigned to a worker by hashing its operation id, so all traffic of one
//! operation on one route is processed in order by a single worker while
//! different operations proceed in parallel. Queue capacity is enforced at
//! dispatch: a full queue backpressures the producer instead of growing
//! unbounded.
//!
//! Retries are scheduled re-deliveries through [`Dispatcher::dispatch_after`];
//! a worker never sleeps holding its queue.

pub mod cancellation;

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::config::DispatchSettings;
use crate::messages::WorkflowMessage;

pub use cancellation::CancellationRegistry;

/// Logical destinations of the workflow traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Route {
    /// Operation-level command handlers.
    OperationsExecutor,
    /// Transaction-level command handlers.
    TransactionsExecutor,
    /// Operation-level process manager.
    OperationsSaga,
    /// Transaction-level process manager.
    TransactionsSaga,
}

impl Route {
    pub const ALL: [Route; 4] = [
        Route::OperationsExecutor,
        Route::TransactionsExecutor,
        Route::OperationsSaga,
        Route::TransactionsSaga,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Route::OperationsExecutor => "operations-executor",
            Route::TransactionsExecutor => "transactions-executor",
            Route::OperationsSaga => "operations-saga",
            Route::TransactionsSaga => "transactions-saga",
        }
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One delivery of one message on one route.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub route: Route,
    pub message: WorkflowMessage,
    /// Fence sequence assigned when the message was issued.
    pub sequence: u64,
    /// Delivery attempt, starting at 1.
    pub attempt: u32,
}

#[async_trait]
pub trait MessageProcessor: Send + Sync + 'static {
    /// Consume one delivery. Re-deliveries are the processor's business,
    /// scheduled through [`Dispatcher::dispatch_after`].
    async fn process(&self, envelope: Envelope);
}

struct Inner {
    senders: HashMap<Route, Vec<mpsc::Sender<Envelope>>>,
    shutdown: watch::Sender<bool>,
}

impl Inner {
    fn worker_for(&self, envelope: &Envelope) -> &mpsc::Sender<Envelope> {
        let workers = &self.senders[&envelope.route];
        let mut hasher = FxHasher::default();
        envelope.message.operation_id().hash(&mut hasher);
        let index = (hasher.finish() as usize) % workers.len();
        &workers[index]
    }

    async fn dispatch(&self, envelope: Envelope) {
        let sender = self.worker_for(&envelope);
        if sender.send(envelope).await.is_err() {
            warn!("dispatch after shutdown, message dropped");
        }
    }
}

/// Cheap-to-clone handle over the worker pools.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    /// Spawn the worker pools and return the dispatch handle.
    pub fn start(processor: Arc<dyn MessageProcessor>, settings: &DispatchSettings) -> Self {
        let workers = settings.workers.max(1);
        let per_worker_capacity = (settings.queue_capacity / workers).max(1);
        let (shutdown_tx, _) = watch::channel(false);

        let mut senders = HashMap::new();
        let mut receivers = Vec::new();
        for route in Route::ALL {
            let mut route_senders = Vec::with_capacity(workers);
            for worker in 0..workers {
                let (tx, rx) = mpsc::channel(per_worker_capacity);
                route_senders.push(tx);
                receivers.push((route, worker, rx));
            }
            senders.insert(route, route_senders);
        }

        let inner = Arc::new(Inner {
            senders,
            shutdown: shutdown_tx,
        });

        for (route, worker, rx) in receivers {
            let processor = Arc::clone(&processor);
            let shutdown = inner.shutdown.subscribe();
            tokio::spawn(worker_loop(route, worker, rx, processor, shutdown));
        }

        Self { inner }
    }

    /// Deliver an envelope, waiting for queue room when the route is full.
    pub async fn dispatch(&self, envelope: Envelope) {
        self.inner.dispatch(envelope).await;
    }

    /// Schedule a delivery after the delay without occupying a worker.
    pub fn dispatch_after(&self, envelope: Envelope, delay: Duration) {
        let inner = Arc::clone(&self.inner);
        let mut shutdown = inner.shutdown.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => inner.dispatch(envelope).await,
                _ = shutdown.changed() => {}
            }
        });
    }

    pub fn shutdown(&self) {
        let _ = self.inner.shutdown.send(true);
    }
}

async fn worker_loop(
    route: Route,
    worker: usize,
    mut rx: mpsc::Receiver<Envelope>,
    processor: Arc<dyn MessageProcessor>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(%route, worker, "execution context worker started");
    loop {
        let envelope = tokio::select! {
            maybe = rx.recv() => match maybe {
                Some(envelope) => envelope,
                None => break,
            },
            _ = shutdown.changed() => break,
        };

        processor.process(envelope).await;
    }
    debug!(%route, worker, "execution context worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::OperationId;
    use crate::messages::Command;
    use std::sync::Mutex;

    fn envelope(route: Route, operation_id: OperationId) -> Envelope {
        Envelope {
            route,
            message: WorkflowMessage::Command(Command::GenerateActiveTransactionId {
                operation_id,
            }),
            sequence: 1,
            attempt: 1,
        }
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(Route, OperationId, u32)>>,
    }

    #[async_trait]
    impl MessageProcessor for Recorder {
        async fn process(&self, envelope: Envelope) {
            self.seen.lock().unwrap().push((
                envelope.route,
                envelope.message.operation_id(),
                envelope.attempt,
            ));
        }
    }

    fn settings() -> DispatchSettings {
        DispatchSettings {
            workers: 2,
            queue_capacity: 16,
            failed_command_retry_delay_ms: 5,
        }
    }

    #[tokio::test]
    async fn messages_reach_the_processor_on_their_route() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = Dispatcher::start(recorder.clone(), &settings());
        let op = OperationId::new();

        dispatcher
            .dispatch(envelope(Route::OperationsExecutor, op))
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen.as_slice(), &[(Route::OperationsExecutor, op, 1)]);
        dispatcher.shutdown();
    }

    #[tokio::test]
    async fn one_operation_keeps_its_processing_order() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = Dispatcher::start(recorder.clone(), &settings());
        let op = OperationId::new();

        for attempt in 1..=8 {
            let mut env = envelope(Route::TransactionsExecutor, op);
            env.sequence = attempt as u64;
            env.attempt = attempt;
            dispatcher.dispatch(env).await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        let attempts: Vec<u32> = recorder
            .seen
            .lock()
            .unwrap()
            .iter()
            .map(|(_, _, attempt)| *attempt)
            .collect();
        assert_eq!(attempts, (1..=8).collect::<Vec<u32>>());
        dispatcher.shutdown();
    }

    #[tokio::test]
    async fn delayed_dispatch_arrives_after_the_delay() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = Dispatcher::start(recorder.clone(), &settings());
        let op = OperationId::new();

        dispatcher.dispatch_after(
            envelope(Route::OperationsSaga, op),
            Duration::from_millis(30),
        );

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(recorder.seen.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(recorder.seen.lock().unwrap().len(), 1);
        dispatcher.shutdown();
    }
}
