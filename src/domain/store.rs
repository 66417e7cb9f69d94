//! Aggregate persistence seam.
//!
//! Handlers load an aggregate, mutate it through its transition table and
//! save it back. The store trait keeps that loop independent of the backing
//! storage; the in-memory implementation backs tests and the mock profile.

use std::fmt::Display;
use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("aggregate storage backend failure: {0}")]
    Backend(String),
}

/// A persistable workflow aggregate.
pub trait Aggregate: Clone + Send + Sync + 'static {
    type Id: Copy + Eq + Hash + Send + Sync + Display;

    fn id(&self) -> Self::Id;
}

#[async_trait]
pub trait AggregateStore<A: Aggregate>: Send + Sync {
    async fn load(&self, id: A::Id) -> Result<Option<A>, StoreError>;
    async fn save(&self, aggregate: &A) -> Result<(), StoreError>;
}

/// Concurrent in-memory store keyed by aggregate id.
pub struct InMemoryStore<A: Aggregate> {
    entries: DashMap<A::Id, A>,
}

impl<A: Aggregate> InMemoryStore<A> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: DashMap::new(),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl<A: Aggregate> AggregateStore<A> for InMemoryStore<A> {
    async fn load(&self, id: A::Id) -> Result<Option<A>, StoreError> {
        Ok(self.entries.get(&id).map(|entry| entry.clone()))
    }

    async fn save(&self, aggregate: &A) -> Result<(), StoreError> {
        self.entries.insert(aggregate.id(), aggregate.clone());
        Ok(())
    }
}
