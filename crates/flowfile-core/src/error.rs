//! Error types for the flowfile graph engine
//!
//! This module defines the full error taxonomy from the engine
//! specification's error-handling design (§7): caller-recoverable structural
//! errors (`Validation`, `Cycle`, `Arity`, `Busy`, `NotFound`), the
//! non-fatal propagated `Schema` error, and the per-node-fatal `Eval` error
//! with its sub-kinds.
//!
//! # Propagation policy
//!
//! Caller-recoverable errors (`Validation`, `Cycle`, `Arity`, `Busy`,
//! `NotFound`) are returned directly and never mutate graph state. `Schema`
//! and `Eval` errors are *also* attached to the offending node and surfaced
//! through the run's event stream — a failed node does not abort independent
//! branches (§4.2, §7).

use crate::ids::NodeId;
use thiserror::Error;

/// Convenience result type using [`FlowfileError`].
pub type Result<T> = std::result::Result<T, FlowfileError>;

/// Sub-kind of an [`FlowfileError::Eval`] failure, per §7's taxonomy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalErrorKind {
    /// Storage-backend I/O failure (read/write/scan).
    Io,
    /// Per-node timeout expired.
    Timeout,
    /// The run's cancellation token fired mid-compute.
    Cancelled,
    /// A value or column had an incompatible type for the requested operation.
    TypeMismatch,
    /// The `polars_code` sandbox returned an error.
    UserCode,
    /// An unexpected panic/exception from `compute` was caught and wrapped
    /// rather than allowed to crash the engine.
    Internal,
}

impl std::fmt::Display for EvalErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EvalErrorKind::Io => "io",
            EvalErrorKind::Timeout => "timeout",
            EvalErrorKind::Cancelled => "cancelled",
            EvalErrorKind::TypeMismatch => "type_mismatch",
            EvalErrorKind::UserCode => "user_code",
            EvalErrorKind::Internal => "internal",
        };
        write!(f, "{s}")
    }
}

/// The full error type for graph construction, validation, and execution.
#[derive(Error, Debug)]
pub enum FlowfileError {
    /// A node settings update was malformed: unknown keys, missing required
    /// keys, or a numeric value out of bounds.
    #[error("settings validation failed for node {node}: {message}")]
    SettingsValidation { node: NodeId, message: String },

    /// `connect` would have introduced a cycle.
    #[error("connecting {source} -> {target} would create a cycle")]
    Cycle { source: NodeId, target: NodeId },

    /// `connect` would exceed the target input label's arity cap, or drop
    /// below its minimum on `disconnect`.
    #[error("input '{label}' on node {node} accepts {min}..={max:?} connections, operation would violate that")]
    Arity {
        node: NodeId,
        label: String,
        min: usize,
        max: Option<usize>,
    },

    /// A node's schema could not be derived. Non-fatal: the node and its
    /// descendants record this and the graph remains structurally valid.
    #[error("schema error on node {node}: {message}")]
    Schema { node: NodeId, message: String },

    /// A node upstream of this one failed schema propagation.
    #[error("upstream schema error reached node {node} via {upstream}")]
    UpstreamSchema { node: NodeId, upstream: NodeId },

    /// `compute` or materialization failed. Per-node fatal: the node
    /// transitions to `Error` but independent branches continue.
    #[error("node {node} evaluation failed ({kind}): {message}")]
    Eval {
        node: NodeId,
        kind: EvalErrorKind,
        message: String,
    },

    /// A mutation or history operation was attempted while a run holds the
    /// graph's shared lock.
    #[error("graph is busy executing a run")]
    Busy,

    /// An operation referenced a node or edge that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// History snapshot storage failed.
    #[error("history error: {0}")]
    History(#[from] flowfile_checkpoint::SnapshotError),

    /// Document (de)serialization failed.
    #[error("document serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The embedded lazy engine reported an error not otherwise classified
    /// above (wrapped into `Eval` at the node boundary; this variant exists
    /// for engine-level failures outside any single node, e.g. during
    /// `generate_code`).
    #[error("lazy engine error: {0}")]
    Engine(String),
}

impl FlowfileError {
    pub fn settings_validation(node: NodeId, message: impl Into<String>) -> Self {
        Self::SettingsValidation {
            node,
            message: message.into(),
        }
    }

    pub fn schema(node: NodeId, message: impl Into<String>) -> Self {
        Self::Schema {
            node,
            message: message.into(),
        }
    }

    pub fn eval(node: NodeId, kind: EvalErrorKind, message: impl Into<String>) -> Self {
        Self::Eval {
            node,
            kind,
            message: message.into(),
        }
    }

    /// Whether this error is one of the caller-recoverable kinds that never
    /// mutate graph state (§7's "Propagation policy").
    pub fn is_caller_recoverable(&self) -> bool {
        matches!(
            self,
            FlowfileError::SettingsValidation { .. }
                | FlowfileError::Cycle { .. }
                | FlowfileError::Arity { .. }
                | FlowfileError::Busy
                | FlowfileError::NotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caller_recoverable_classification() {
        assert!(FlowfileError::Busy.is_caller_recoverable());
        assert!(FlowfileError::NotFound("x".into()).is_caller_recoverable());
        assert!(!FlowfileError::eval(NodeId(1), EvalErrorKind::Io, "boom").is_caller_recoverable());
        assert!(!FlowfileError::schema(NodeId(1), "bad").is_caller_recoverable());
    }

    #[test]
    fn eval_error_kind_display() {
        assert_eq!(EvalErrorKind::Cancelled.to_string(), "cancelled");
        assert_eq!(EvalErrorKind::TypeMismatch.to_string(), "type_mismatch");
    }
}
