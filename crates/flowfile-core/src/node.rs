//! `FlowNode` — one vertex in a flow graph: a kind, its settings, its
//! lifecycle state, and (once computed) a cached result handle and schema.
//!
//! Fingerprinting (§8, "fingerprint stability") hashes a node's kind and
//! normalized settings together with its upstream fingerprints, so any
//! change anywhere in a node's ancestry changes its own fingerprint.

use crate::edge::{Arity, ArityDeclaration, InputLabel};
use crate::error::{FlowfileError, Result};
use crate::handle::LazyFrameHandle;
use crate::ids::NodeId;
use crate::settings::{NodeKind, NodeSettings};
use crate::types::Schema;
use serde::{Deserialize, Serialize};

/// A content fingerprint: blake3 of a node's kind, settings, and upstream
/// fingerprints. Two nodes with identical fingerprints are guaranteed to
/// produce identical output given identical source data (§8).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub String);

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A node's place in the compute lifecycle (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowNodeState {
    /// Just added, settings not yet validated against upstream schema.
    Unconfigured,
    /// Settings are valid and upstream schema is known; not yet computed.
    Configured,
    /// A run currently holds this node.
    Computing,
    /// Last compute succeeded; `cached_handle`/`schema` are current.
    Ready,
    /// Was `Ready`, but an upstream or own-settings change invalidated the
    /// cached result. `cached_handle` and `schema` are cleared immediately
    /// (see `invalidate`); `schema` is repopulated by the next
    /// `schema_after` pass over this node and its descendants.
    Stale,
    /// Last compute failed; `last_error` carries the reason.
    Error,
}

/// A lightweight, cloneable record of a node's last evaluation failure.
/// [`FlowfileError`] is not `Clone` (it wraps external error types), so
/// `FlowNode` stores the rendered message instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeErrorRecord {
    pub message: String,
}

impl From<&FlowfileError> for NodeErrorRecord {
    fn from(error: &FlowfileError) -> Self {
        NodeErrorRecord {
            message: error.to_string(),
        }
    }
}

/// Editor-facing metadata that has no bearing on computation or fingerprint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeMetadata {
    pub position: Option<(f64, f64)>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowNode {
    pub id: NodeId,
    pub settings: NodeSettings,
    pub metadata: NodeMetadata,
    pub cache_enabled: bool,
    state: FlowNodeState,
    #[serde(skip)]
    cached_handle: Option<LazyFrameHandle>,
    schema: Option<Schema>,
    last_error: Option<NodeErrorRecord>,
    fingerprint: Option<Fingerprint>,
}

impl FlowNode {
    pub fn new(id: NodeId, settings: NodeSettings) -> Self {
        FlowNode {
            id,
            settings,
            metadata: NodeMetadata::default(),
            cache_enabled: true,
            state: FlowNodeState::Unconfigured,
            cached_handle: None,
            schema: None,
            last_error: None,
            fingerprint: None,
        }
    }

    pub fn kind(&self) -> NodeKind {
        self.settings.kind()
    }

    pub fn state(&self) -> FlowNodeState {
        self.state
    }

    pub fn schema(&self) -> Option<&Schema> {
        self.schema.as_ref()
    }

    pub fn cached_handle(&self) -> Option<&LazyFrameHandle> {
        self.cached_handle.as_ref()
    }

    pub fn fingerprint(&self) -> Option<&Fingerprint> {
        self.fingerprint.as_ref()
    }

    pub fn last_error(&self) -> Option<&NodeErrorRecord> {
        self.last_error.as_ref()
    }

    /// The declared arity for every input label this node's kind accepts.
    /// Labels absent from the map implicitly reject any connection.
    pub fn arity(&self) -> ArityDeclaration {
        declared_arity(self.kind())
    }

    /// Replace this node's settings, re-validate, and move to `Stale` if it
    /// was previously `Ready`/`Error` (a no-op settings update — identical
    /// fingerprint — is the caller's responsibility to detect before calling
    /// this, per §4.3's "no-op on identical fingerprint").
    pub fn update_settings(&mut self, settings: NodeSettings) -> Result<()> {
        settings.validate(self.id)?;
        self.settings = settings;
        self.invalidate();
        Ok(())
    }

    /// Drop any cached result and move to `Configured`/`Stale` as appropriate.
    /// Called on settings changes and on upstream invalidation.
    pub fn invalidate(&mut self) {
        self.cached_handle = None;
        self.schema = None;
        self.fingerprint = None;
        self.last_error = None;
        self.state = match self.state {
            FlowNodeState::Unconfigured => FlowNodeState::Unconfigured,
            _ => FlowNodeState::Stale,
        };
    }

    pub fn mark_computing(&mut self) {
        self.state = FlowNodeState::Computing;
    }

    pub fn mark_ready(&mut self, handle: LazyFrameHandle, fingerprint: Fingerprint) {
        self.schema = Some(handle.schema().clone());
        self.cached_handle = Some(handle);
        self.fingerprint = Some(fingerprint);
        self.last_error = None;
        self.state = FlowNodeState::Ready;
    }

    pub fn mark_error(&mut self, error: &FlowfileError) {
        self.last_error = Some(error.into());
        self.cached_handle = None;
        self.state = FlowNodeState::Error;
    }

    pub fn mark_configured(&mut self) {
        if self.state == FlowNodeState::Unconfigured {
            self.state = FlowNodeState::Configured;
        }
    }

    /// Record a freshly derived schema from `schema_after`, clearing any
    /// previous error and moving an `Unconfigured` node to `Configured`
    /// (§4.2: "settings are valid and upstream schema is known").
    pub fn set_schema(&mut self, schema: Schema) {
        self.schema = Some(schema);
        self.last_error = None;
        self.mark_configured();
    }

    /// Record a non-fatal schema-propagation failure (`Schema`/
    /// `UpstreamSchema`, §7). Unlike `mark_error`, this never moves the node
    /// to `Error` — that state is reserved for a failed `compute`.
    pub fn set_schema_error(&mut self, error: FlowfileError) {
        self.schema = None;
        self.last_error = Some((&error).into());
    }

    /// Compute this node's fingerprint from its kind, settings, and the
    /// already-computed fingerprints of its upstream nodes, ordered by
    /// `(label, source node id)` so connection order never affects the
    /// result (§8).
    pub fn compute_fingerprint(&self, mut upstream: Vec<(InputLabel, NodeId, Fingerprint)>) -> Result<Fingerprint> {
        upstream.sort_by(|a, b| (a.0 as u8, a.1).cmp(&(b.0 as u8, b.1)));
        let settings_json = serde_json::to_vec(&self.settings)?;
        let mut hasher = blake3::Hasher::new();
        hasher.update(format!("{:?}", self.kind()).as_bytes());
        hasher.update(b"\0");
        hasher.update(&settings_json);
        for (label, node, fp) in &upstream {
            hasher.update(label.to_string().as_bytes());
            hasher.update(node.to_string().as_bytes());
            hasher.update(fp.0.as_bytes());
        }
        Ok(Fingerprint(hasher.finalize().to_hex().to_string()))
    }
}

/// The arity declaration for each node kind (§4.2). Multi-input kinds use
/// `Left`/`Right`; everything else uses a single `Main` input (or none, for
/// sources).
pub fn declared_arity(kind: NodeKind) -> ArityDeclaration {
    use InputLabel::*;
    let mut map = ArityDeclaration::new();
    if kind.is_source() {
        return map;
    }
    match kind {
        NodeKind::Join | NodeKind::FuzzyMatch => {
            map.insert(Left, Arity::exactly_one());
            map.insert(Right, Arity::exactly_one());
        }
        NodeKind::Concat | NodeKind::Union => {
            map.insert(Main, Arity::unbounded(1));
        }
        _ => {
            map.insert(Main, Arity::exactly_one());
        }
    }
    map
}
