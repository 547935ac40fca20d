//! `FlowGraph` — the DAG of [`FlowNode`]s for one flow (§4.3).
//!
//! Backed by `petgraph::DiGraph`, keyed by our own [`NodeId`] rather than
//! petgraph's `NodeIndex` so node identity survives deletions (petgraph
//! reuses freed indices; a stable external id must not).

use crate::edge::InputLabel;
use crate::error::{FlowfileError, Result};
use crate::ids::{IdSequence, NodeId};
use crate::node::{Fingerprint, FlowNode};
use crate::schema::{schema_after, UpstreamSchemas};
use crate::settings::{NodeKind, NodeSettings};
use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::HashMap;

/// One connection: an edge from `source`'s output into `target`'s `label`
/// input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub source: NodeId,
    pub target: NodeId,
    pub label: InputLabel,
}

pub struct FlowGraph {
    ids: IdSequence,
    nodes: HashMap<NodeId, FlowNode>,
    index_of: HashMap<NodeId, NodeIndex>,
    graph: DiGraph<NodeId, InputLabel>,
}

impl Default for FlowGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowGraph {
    pub fn new() -> Self {
        FlowGraph {
            ids: IdSequence::new(),
            nodes: HashMap::new(),
            index_of: HashMap::new(),
            graph: DiGraph::new(),
        }
    }

    pub fn node(&self, id: NodeId) -> Result<&FlowNode> {
        self.nodes.get(&id).ok_or_else(|| FlowfileError::NotFound(id.to_string()))
    }

    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut FlowNode> {
        self.nodes
            .get_mut(&id)
            .ok_or_else(|| FlowfileError::NotFound(id.to_string()))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &FlowNode> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Add a node of `kind` with `settings` (validated up front) and return
    /// its new id.
    pub fn add_node(&mut self, settings: NodeSettings) -> Result<NodeId> {
        let id = NodeId(self.ids.next());
        self.insert_node(id, settings)
    }

    /// Add a node under an explicit id, seeding the id sequence past it so
    /// later auto-assigned ids never collide. Used by
    /// `FlowDocument::to_graph` to preserve recorded ids across a reload,
    /// which matters once any earlier node has been deleted and ids are no
    /// longer contiguous from 1.
    pub fn add_node_with_id(&mut self, id: NodeId, settings: NodeSettings) -> Result<NodeId> {
        if self.nodes.contains_key(&id) {
            return Err(FlowfileError::Engine(format!("node {id} already exists")));
        }
        self.ids.seed(id.0 + 1);
        self.insert_node(id, settings)
    }

    fn insert_node(&mut self, id: NodeId, settings: NodeSettings) -> Result<NodeId> {
        settings.validate(id)?;
        let node = FlowNode::new(id, settings);
        let index = self.graph.add_node(id);
        self.nodes.insert(id, node);
        self.index_of.insert(id, index);
        self.propagate_schema_from(id)?;
        Ok(id)
    }

    /// Remove a node and every edge touching it. Does not cascade-delete
    /// cached results for descendants (§4.3: "deletion doesn't cascade the
    /// cache"), since a deleted node may be re-added with the same
    /// fingerprint and those downstream results would still be valid.
    pub fn delete_node(&mut self, id: NodeId) -> Result<()> {
        let index = *self
            .index_of
            .get(&id)
            .ok_or_else(|| FlowfileError::NotFound(id.to_string()))?;
        let descendants = self.descendants(id)?;
        self.graph.remove_node(index);
        self.index_of.remove(&id);
        self.nodes.remove(&id);
        // removing a node shifts petgraph's internal indices; rebuild ours.
        self.reindex();
        for descendant in &descendants {
            if let Ok(node) = self.node_mut(*descendant) {
                node.invalidate();
            }
        }
        self.propagate_schema(descendants)?;
        Ok(())
    }

    fn reindex(&mut self) {
        self.index_of.clear();
        for index in self.graph.node_indices() {
            let id = self.graph[index];
            self.index_of.insert(id, index);
        }
    }

    fn edges_into(&self, target: NodeId, label: InputLabel) -> Result<usize> {
        let target_index = self.require_index(target)?;
        Ok(self
            .graph
            .edges_directed(target_index, petgraph::Direction::Incoming)
            .filter(|e| *e.weight() == label)
            .count())
    }

    fn require_index(&self, id: NodeId) -> Result<NodeIndex> {
        self.index_of.get(&id).copied().ok_or_else(|| FlowfileError::NotFound(id.to_string()))
    }

    /// Connect `source`'s output to `target`'s `label` input. A duplicate of
    /// an existing `(source, target, label)` triple is a no-op (§4.3).
    pub fn connect(&mut self, source: NodeId, target: NodeId, label: InputLabel) -> Result<()> {
        let source_index = self.require_index(source)?;
        let target_index = self.require_index(target)?;

        let already_connected = self
            .graph
            .edges_directed(target_index, petgraph::Direction::Incoming)
            .any(|e| e.source() == source_index && *e.weight() == label);
        if already_connected {
            return Ok(());
        }

        if has_path_connecting(&self.graph, target_index, source_index, None) {
            return Err(FlowfileError::Cycle { source, target });
        }

        let target_node = self.node(target)?;
        let arity = target_node.arity();
        let declared = arity.get(&label).copied().unwrap_or(crate::edge::Arity::none());
        let current_count = self.edges_into(target, label)?;
        if !declared.accepts(current_count + 1) {
            return Err(FlowfileError::Arity {
                node: target,
                label: label.to_string(),
                min: declared.min,
                max: declared.max,
            });
        }

        self.graph.add_edge(source_index, target_index, label);
        if let Ok(node) = self.node_mut(target) {
            node.invalidate();
        }
        for descendant in self.descendants(target)? {
            if let Ok(node) = self.node_mut(descendant) {
                node.invalidate();
            }
        }
        self.propagate_schema_from(target)?;
        Ok(())
    }

    /// Remove the `(source, target, label)` edge, if present.
    pub fn disconnect(&mut self, source: NodeId, target: NodeId, label: InputLabel) -> Result<()> {
        let source_index = self.require_index(source)?;
        let target_index = self.require_index(target)?;
        let edge_index = self
            .graph
            .edges_directed(target_index, petgraph::Direction::Incoming)
            .find(|e| e.source() == source_index && *e.weight() == label)
            .map(|e| e.id());
        if let Some(edge_index) = edge_index {
            self.graph.remove_edge(edge_index);
            if let Ok(node) = self.node_mut(target) {
                node.invalidate();
            }
            for descendant in self.descendants(target)? {
                if let Ok(node) = self.node_mut(descendant) {
                    node.invalidate();
                }
            }
            self.propagate_schema_from(target)?;
        }
        Ok(())
    }

    /// Replace a node's settings. A no-op if the resulting fingerprint is
    /// identical to the current one (§4.3).
    pub fn update_settings(&mut self, id: NodeId, settings: NodeSettings) -> Result<()> {
        settings.validate(id)?;
        let new_fp = self.fingerprint_of_with(id, Some(&settings))?;
        let old_fp = self.fingerprint_of(id)?;
        if new_fp == old_fp {
            return Ok(());
        }
        self.node_mut(id)?.update_settings(settings)?;
        for descendant in self.descendants(id)? {
            if let Ok(node) = self.node_mut(descendant) {
                node.invalidate();
            }
        }
        self.propagate_schema_from(id)?;
        Ok(())
    }

    pub fn kind_of(&self, id: NodeId) -> Result<NodeKind> {
        Ok(self.node(id)?.kind())
    }

    /// Direct input edges into `target`, in `(label, source)` form.
    pub fn inputs_of(&self, target: NodeId) -> Result<Vec<(InputLabel, NodeId)>> {
        let index = self.require_index(target)?;
        Ok(self
            .graph
            .edges_directed(index, petgraph::Direction::Incoming)
            .map(|e| (*e.weight(), self.graph[e.source()]))
            .collect())
    }

    /// Direct children (one hop downstream) of `source`, deduplicated.
    pub fn outputs_of(&self, source: NodeId) -> Result<Vec<NodeId>> {
        let index = self.require_index(source)?;
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for edge in self.graph.edges_directed(index, petgraph::Direction::Outgoing) {
            let target = self.graph[edge.target()];
            if seen.insert(target) {
                out.push(target);
            }
        }
        Ok(out)
    }

    /// All downstream nodes reachable from `id` (exclusive of `id` itself).
    pub fn descendants(&self, id: NodeId) -> Result<Vec<NodeId>> {
        let start = self.require_index(id)?;
        let mut visited = Vec::new();
        let mut stack = vec![start];
        let mut seen = std::collections::HashSet::new();
        seen.insert(start);
        while let Some(current) = stack.pop() {
            for edge in self.graph.edges_directed(current, petgraph::Direction::Outgoing) {
                let next = edge.target();
                if seen.insert(next) {
                    visited.push(self.graph[next]);
                    stack.push(next);
                }
            }
        }
        Ok(visited)
    }

    /// A topological order over the whole graph. `Cycle` is unreachable in
    /// practice since `connect` refuses to introduce one, but `toposort` is
    /// the authoritative check.
    pub fn topological_order(&self) -> Result<Vec<NodeId>> {
        toposort(&self.graph, None)
            .map(|order| order.into_iter().map(|index| self.graph[index]).collect())
            .map_err(|cycle| {
                let id = self.graph[cycle.node_id()];
                FlowfileError::Cycle { source: id, target: id }
            })
    }

    /// Compute `id`'s fingerprint from its current settings and its
    /// upstream nodes' fingerprints, recursing as needed. Pure: does not
    /// mutate any node's persisted `fingerprint` field.
    pub fn fingerprint_of(&self, id: NodeId) -> Result<Fingerprint> {
        self.fingerprint_of_with(id, None)
    }

    fn fingerprint_of_with(&self, id: NodeId, override_settings: Option<&NodeSettings>) -> Result<Fingerprint> {
        let mut memo = HashMap::new();
        self.fingerprint_rec(id, override_settings, &mut memo)
    }

    fn fingerprint_rec(
        &self,
        id: NodeId,
        override_settings: Option<&NodeSettings>,
        memo: &mut HashMap<NodeId, Fingerprint>,
    ) -> Result<Fingerprint> {
        if let Some(cached) = memo.get(&id) {
            return Ok(cached.clone());
        }
        let node = self.node(id)?;
        let upstream_edges = self.inputs_of(id)?;
        let mut upstream = Vec::with_capacity(upstream_edges.len());
        for (label, source) in upstream_edges {
            let fp = self.fingerprint_rec(source, None, memo)?;
            upstream.push((label, source, fp));
        }
        let fingerprint = if let Some(settings) = override_settings {
            let probe = FlowNode::new(id, settings.clone());
            probe.compute_fingerprint(upstream)?
        } else {
            node.compute_fingerprint(upstream)?
        };
        memo.insert(id, fingerprint.clone());
        Ok(fingerprint)
    }

    /// Recompute `id`'s schema and every transitive descendant's, in
    /// topological order (§4.3: "A mutation marks the mutated node and its
    /// transitive descendants as schema-dirty. A single pass in topological
    /// order recomputes").
    fn propagate_schema_from(&mut self, id: NodeId) -> Result<()> {
        let mut ids = vec![id];
        ids.extend(self.descendants(id)?);
        self.propagate_schema(ids)
    }

    /// Recompute schema for exactly these ids (already known to include
    /// every node whose upstream schema may have changed), in topological
    /// order so each node's upstream is recomputed before it is.
    fn propagate_schema(&mut self, ids: Vec<NodeId>) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let topo = self.topological_order()?;
        let position: HashMap<NodeId, usize> = topo.iter().enumerate().map(|(i, n)| (*n, i)).collect();
        let mut ordered = ids;
        ordered.sort_by_key(|n| position.get(n).copied().unwrap_or(usize::MAX));
        for id in ordered {
            self.recompute_schema(id)?;
        }
        Ok(())
    }

    /// A node whose upstream schema is itself unknown records
    /// `UpstreamSchema` rather than attempting `schema_after` against a gap
    /// (§4.3: "its descendants then see Upstream-unknown and record a
    /// derived error"). Otherwise `schema_after` runs and its result
    /// (success or failure) is recorded directly — neither case is a hard
    /// error here; the graph stays structurally valid either way.
    fn recompute_schema(&mut self, id: NodeId) -> Result<()> {
        let upstream_edges = self.inputs_of(id)?;
        let mut upstream = UpstreamSchemas::default();
        let mut upstream_failure = None;
        for (label, source) in &upstream_edges {
            match self.node(*source)?.schema() {
                Some(schema) => upstream.insert(*label, schema.clone()),
                None => {
                    upstream_failure = Some(*source);
                    break;
                }
            }
        }
        if let Some(source) = upstream_failure {
            self.node_mut(id)?
                .set_schema_error(FlowfileError::UpstreamSchema { node: id, upstream: source });
            return Ok(());
        }
        let settings = self.node(id)?.settings.clone();
        let node = self.node_mut(id)?;
        match schema_after(id, &settings, &upstream) {
            Ok(schema) => node.set_schema(schema),
            Err(error) => node.set_schema_error(error),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::FilterOperator;
    use crate::settings::{BasicFilter, FilterSettings, NodeSettings};

    fn filter_settings(op: FilterOperator) -> NodeSettings {
        NodeSettings::Filter(FilterSettings::Basic(BasicFilter {
            column: "amt".into(),
            operator: op,
            value: Some(serde_json::Value::from(0)),
            value2: None,
        }))
    }

    #[test]
    fn add_and_connect_two_nodes() {
        let mut graph = FlowGraph::new();
        let source = graph.add_node(NodeSettings::default_for(NodeKind::ManualInput)).unwrap();
        let filter = graph.add_node(filter_settings(FilterOperator::GreaterThan)).unwrap();
        graph.connect(source, filter, InputLabel::Main).unwrap();
        assert_eq!(graph.inputs_of(filter).unwrap(), vec![(InputLabel::Main, source)]);
    }

    #[test]
    fn duplicate_connect_is_a_no_op() {
        let mut graph = FlowGraph::new();
        let source = graph.add_node(NodeSettings::default_for(NodeKind::ManualInput)).unwrap();
        let filter = graph.add_node(filter_settings(FilterOperator::GreaterThan)).unwrap();
        graph.connect(source, filter, InputLabel::Main).unwrap();
        graph.connect(source, filter, InputLabel::Main).unwrap();
        assert_eq!(graph.inputs_of(filter).unwrap().len(), 1);
    }

    #[test]
    fn connect_rejects_cycle() {
        let mut graph = FlowGraph::new();
        let a = graph.add_node(filter_settings(FilterOperator::GreaterThan)).unwrap();
        let b = graph.add_node(filter_settings(FilterOperator::LessThan)).unwrap();
        graph.connect(a, b, InputLabel::Main).unwrap();
        let result = graph.connect(b, a, InputLabel::Main);
        assert!(matches!(result, Err(FlowfileError::Cycle { .. })));
    }

    #[test]
    fn connect_rejects_arity_violation() {
        let mut graph = FlowGraph::new();
        let a = graph.add_node(NodeSettings::default_for(NodeKind::ManualInput)).unwrap();
        let b = graph.add_node(NodeSettings::default_for(NodeKind::ManualInput)).unwrap();
        let filter = graph.add_node(filter_settings(FilterOperator::GreaterThan)).unwrap();
        graph.connect(a, filter, InputLabel::Main).unwrap();
        let result = graph.connect(b, filter, InputLabel::Main);
        assert!(matches!(result, Err(FlowfileError::Arity { .. })));
    }

    #[test]
    fn delete_node_invalidates_descendants_but_not_cache() {
        let mut graph = FlowGraph::new();
        let source = graph.add_node(NodeSettings::default_for(NodeKind::ManualInput)).unwrap();
        let filter = graph.add_node(filter_settings(FilterOperator::GreaterThan)).unwrap();
        graph.connect(source, filter, InputLabel::Main).unwrap();
        graph.delete_node(source).unwrap();
        assert!(graph.node(source).is_err());
        assert!(graph.node(filter).is_ok());
    }

    #[test]
    fn topological_order_respects_edges() {
        let mut graph = FlowGraph::new();
        let source = graph.add_node(NodeSettings::default_for(NodeKind::ManualInput)).unwrap();
        let filter = graph.add_node(filter_settings(FilterOperator::GreaterThan)).unwrap();
        graph.connect(source, filter, InputLabel::Main).unwrap();
        let order = graph.topological_order().unwrap();
        let source_pos = order.iter().position(|n| *n == source).unwrap();
        let filter_pos = order.iter().position(|n| *n == filter).unwrap();
        assert!(source_pos < filter_pos);
    }

    #[test]
    fn fingerprint_changes_when_upstream_settings_change() {
        let mut graph = FlowGraph::new();
        let source = graph.add_node(filter_settings(FilterOperator::GreaterThan)).unwrap();
        let filter = graph.add_node(filter_settings(FilterOperator::LessThan)).unwrap();
        graph.connect(source, filter, InputLabel::Main).unwrap();
        let fp_before = graph.fingerprint_of(filter).unwrap();
        graph.update_settings(source, filter_settings(FilterOperator::Equals)).unwrap();
        let fp_after = graph.fingerprint_of(filter).unwrap();
        assert_ne!(fp_before, fp_after);
    }

    #[test]
    fn update_settings_is_noop_on_identical_fingerprint() {
        let mut graph = FlowGraph::new();
        let node = graph.add_node(filter_settings(FilterOperator::GreaterThan)).unwrap();
        let fp_before = graph.fingerprint_of(node).unwrap();
        graph.update_settings(node, filter_settings(FilterOperator::GreaterThan)).unwrap();
        let fp_after = graph.fingerprint_of(node).unwrap();
        assert_eq!(fp_before, fp_after);
    }
}
