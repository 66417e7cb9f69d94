//! Data-driven state transition enforcement.
//!
//! The legal transition graph of each aggregate kind is declared once as an
//! explicit adjacency list instead of being implied by code structure. Every
//! state change goes through [`TransitionTable::switch`], which rejects any
//! edge that was not declared and leaves the aggregate untouched on
//! rejection. An undeclared transition is a consistency defect upstream
//! (dispatch ordering or dedup failure), never something to apply silently.

use std::fmt::Debug;
use std::hash::Hash;

use rustc_hash::FxHashSet;
use thiserror::Error;

/// An aggregate whose state is guarded by a [`TransitionTable`].
pub trait SwitchableState {
    type State: Copy + Eq + Hash + Debug;

    fn state(&self) -> Self::State;
    fn set_state(&mut self, state: Self::State);
}

/// Requested transition is not in the declared graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("state transition {from:?} -> {to:?} is not declared")]
pub struct TransitionError<S: Copy + Eq + Debug> {
    pub from: S,
    pub to: S,
}

/// Immutable set of legal `(from, to)` state pairs for one aggregate kind.
#[derive(Debug, Clone)]
pub struct TransitionTable<S> {
    edges: FxHashSet<(S, S)>,
}

impl<S: Copy + Eq + Hash + Debug> TransitionTable<S> {
    pub fn builder() -> TransitionTableBuilder<S> {
        TransitionTableBuilder {
            edges: FxHashSet::default(),
        }
    }

    /// Check whether the transition is declared, without applying it.
    pub fn can_switch(&self, from: S, to: S) -> bool {
        self.edges.contains(&(from, to))
    }

    /// Apply the transition to the aggregate, or reject it unchanged.
    pub fn switch<A>(&self, aggregate: &mut A, to: S) -> Result<(), TransitionError<S>>
    where
        A: SwitchableState<State = S>,
    {
        let from = aggregate.state();
        if !self.can_switch(from, to) {
            return Err(TransitionError { from, to });
        }
        aggregate.set_state(to);
        Ok(())
    }
}

pub struct TransitionTableBuilder<S> {
    edges: FxHashSet<(S, S)>,
}

impl<S: Copy + Eq + Hash + Debug> TransitionTableBuilder<S> {
    /// Declare a legal edge. Duplicate declarations collapse.
    pub fn allow(mut self, from: S, to: S) -> Self {
        self.edges.insert((from, to));
        self
    }

    pub fn build(self) -> TransitionTable<S> {
        TransitionTable { edges: self.edges }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Phase {
        Draft,
        Active,
        Done,
    }

    #[derive(Debug)]
    struct Doc {
        state: Phase,
    }

    impl SwitchableState for Doc {
        type State = Phase;

        fn state(&self) -> Phase {
            self.state
        }

        fn set_state(&mut self, state: Phase) {
            self.state = state;
        }
    }

    fn table() -> TransitionTable<Phase> {
        TransitionTable::builder()
            .allow(Phase::Draft, Phase::Active)
            .allow(Phase::Active, Phase::Done)
            .build()
    }

    #[test]
    fn declared_transition_is_applied() {
        let table = table();
        let mut doc = Doc { state: Phase::Draft };

        table.switch(&mut doc, Phase::Active).expect("declared edge");
        assert_eq!(doc.state, Phase::Active);
    }

    #[test]
    fn undeclared_transition_is_rejected_without_mutation() {
        let table = table();
        let mut doc = Doc { state: Phase::Draft };

        let err = table.switch(&mut doc, Phase::Done).unwrap_err();

        assert_eq!(
            err,
            TransitionError {
                from: Phase::Draft,
                to: Phase::Done
            }
        );
        assert_eq!(doc.state, Phase::Draft, "rejected switch must not mutate");
    }

    #[test]
    fn self_transition_is_rejected_unless_declared() {
        let table = table();
        let mut doc = Doc {
            state: Phase::Active,
        };

        assert!(table.switch(&mut doc, Phase::Active).is_err());
        assert_eq!(doc.state, Phase::Active);
    }

    #[test]
    fn can_switch_matches_declared_edges() {
        let table = table();

        assert!(table.can_switch(Phase::Draft, Phase::Active));
        assert!(!table.can_switch(Phase::Done, Phase::Draft));
    }
}
