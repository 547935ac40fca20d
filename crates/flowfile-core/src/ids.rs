//! Process-unique identifiers
//!
//! Both ids are plain `u64`s under the hood, per §3 ("process-unique integer
//! id" / "graph-unique integer id"). They are newtyped so the compiler
//! rejects accidentally passing a `FlowId` where a `NodeId` is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifier for a [`crate::graph::FlowGraph`], unique within the owning
/// [`crate::engine::Engine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FlowId(pub u64);

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "flow-{}", self.0)
    }
}

/// Identifier for a [`crate::node::FlowNode`], unique within its owning graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

/// Monotonic id generator. Each [`FlowGraph`](crate::graph::FlowGraph) owns
/// one for its nodes; the [`Engine`](crate::engine::Engine) owns one for
/// flows.
#[derive(Debug, Default)]
pub struct IdSequence(AtomicU64);

impl IdSequence {
    pub fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    /// Allocate and return the next id, starting from 1.
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }

    /// Bump the counter up to at least `min_next`, never down. Used when
    /// replaying a document's recorded node ids so ids assigned afterward
    /// don't collide with ones that were persisted explicitly.
    pub fn seed(&self, min_next: u64) {
        self.0.fetch_max(min_next, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic() {
        let seq = IdSequence::new();
        let a = seq.next();
        let b = seq.next();
        assert!(b > a);
    }

    #[test]
    fn seed_only_moves_the_counter_forward() {
        let seq = IdSequence::new();
        seq.seed(10);
        assert_eq!(seq.next(), 10);
        seq.seed(3);
        assert_eq!(seq.next(), 11);
    }

    #[test]
    fn display_is_prefixed() {
        assert_eq!(FlowId(3).to_string(), "flow-3");
        assert_eq!(NodeId(7).to_string(), "node-7");
    }
}
