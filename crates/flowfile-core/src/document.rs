//! The on-disk/over-the-wire flow format (§4.7), with a `doc_version`
//! migration chain so documents saved by older builds keep loading.

use crate::edge::InputLabel;
use crate::error::{FlowfileError, Result};
use crate::graph::FlowGraph;
use crate::ids::{FlowId, NodeId};
use crate::node::NodeMetadata;
use crate::ops::FilterOperator;
use crate::settings::NodeSettings;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The current format version. New documents are always written at this
/// version; `migrate_raw` brings older ones up to it before deserializing.
pub const CURRENT_DOC_VERSION: u32 = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: NodeId,
    pub settings: NodeSettings,
    #[serde(default)]
    pub metadata: NodeMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub source: NodeId,
    pub target: NodeId,
    pub label: InputLabel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowDocument {
    pub doc_version: u32,
    pub flow_id: FlowId,
    pub nodes: Vec<NodeRecord>,
    pub edges: Vec<EdgeRecord>,
}

impl FlowDocument {
    /// Parse and migrate a serialized document, regardless of which
    /// `doc_version` it was written at.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let raw: Value = serde_json::from_slice(bytes)?;
        let migrated = migrate_raw(raw)?;
        Ok(serde_json::from_value(migrated)?)
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Rebuild a [`FlowGraph`] from this document, preserving each node's
    /// original id and replaying edges in the order they were written.
    /// Ids are not assumed contiguous from 1 — a document saved after a
    /// node was deleted still has gaps, so each node is re-inserted under
    /// its recorded id rather than relying on a freshly assigned one.
    pub fn to_graph(&self) -> Result<FlowGraph> {
        let mut graph = FlowGraph::new();
        for record in &self.nodes {
            graph.add_node_with_id(record.id, record.settings.clone())?;
            graph.node_mut(record.id)?.metadata = record.metadata.clone();
        }
        for edge in &self.edges {
            graph.connect(edge.source, edge.target, edge.label)?;
        }
        Ok(graph)
    }

    /// Serialize a [`FlowGraph`]'s current structure into a document for
    /// `flow_id`. Node iteration order is not guaranteed stable across
    /// graphs built different ways; callers that need deterministic output
    /// (e.g. fingerprint-stability tests) should sort by id first.
    pub fn from_graph(flow_id: FlowId, graph: &FlowGraph) -> Result<Self> {
        let mut nodes: Vec<NodeRecord> = graph
            .nodes()
            .map(|node| NodeRecord {
                id: node.id,
                settings: node.settings.clone(),
                metadata: node.metadata.clone(),
            })
            .collect();
        nodes.sort_by_key(|n| n.id);

        let mut edges = Vec::new();
        for node in &nodes {
            for (label, source) in graph.inputs_of(node.id)? {
                edges.push(EdgeRecord {
                    source,
                    target: node.id,
                    label,
                });
            }
        }

        Ok(FlowDocument {
            doc_version: CURRENT_DOC_VERSION,
            flow_id,
            nodes,
            edges,
        })
    }
}

/// Migrate a raw JSON document to [`CURRENT_DOC_VERSION`]. Absent
/// `doc_version` is treated as version 0 (§9).
fn migrate_raw(mut value: Value) -> Result<Value> {
    let mut version = value.get("doc_version").and_then(|v| v.as_u64()).unwrap_or(0) as u32;

    if version == 0 {
        migrate_v0_to_v1(&mut value);
        version = 1;
    }
    if version == 1 {
        migrate_v1_to_v2(&mut value)?;
        version = 2;
    }

    if let Some(obj) = value.as_object_mut() {
        obj.insert("doc_version".to_string(), Value::from(version));
    }
    Ok(value)
}

fn each_filter_settings_mut(value: &mut Value, mut f: impl FnMut(&mut serde_json::Map<String, Value>) -> Result<()>) -> Result<()> {
    let Some(nodes) = value.get_mut("nodes").and_then(|n| n.as_array_mut()) else {
        return Ok(());
    };
    for node in nodes {
        let Some(settings) = node.get_mut("settings").and_then(|s| s.as_object_mut()) else {
            continue;
        };
        let is_filter = settings.get("kind").and_then(|k| k.as_str()) == Some("filter");
        let is_basic = settings.get("mode").and_then(|m| m.as_str()) == Some("basic");
        if is_filter && is_basic {
            f(settings)?;
        }
    }
    Ok(())
}

/// v0 documents named the comparison value `filter_value`; v1 renamed it to
/// `value` to match `between`'s `value`/`value2` pair.
fn migrate_v0_to_v1(value: &mut Value) {
    let _ = each_filter_settings_mut(value, |settings| {
        if let Some(old) = settings.remove("filter_value") {
            settings.insert("value".to_string(), old);
        }
        Ok(())
    });
}

/// v1 documents used legacy symbolic operators (`=`, `!=`, ...); v2 requires
/// the canonical operator names.
fn migrate_v1_to_v2(value: &mut Value) -> Result<()> {
    let node_ids: Vec<Value> = value
        .get("nodes")
        .and_then(|n| n.as_array())
        .map(|nodes| nodes.iter().map(|n| n.get("id").cloned().unwrap_or(Value::Null)).collect())
        .unwrap_or_default();
    let mut index = 0usize;
    each_filter_settings_mut(value, |settings| {
        let node_id = node_ids
            .get(index)
            .and_then(|v| v.as_u64())
            .map(NodeId)
            .unwrap_or(NodeId(0));
        index += 1;
        if let Some(Value::String(symbol)) = settings.get("operator").cloned() {
            if serde_json::from_value::<FilterOperator>(Value::String(symbol.clone())).is_err() {
                let canonical = FilterOperator::from_legacy_symbol(&symbol).ok_or_else(|| {
                    FlowfileError::settings_validation(
                        node_id,
                        format!("unknown legacy filter operator '{symbol}'"),
                    )
                })?;
                let canonical_json = serde_json::to_value(canonical)?;
                settings.insert("operator".to_string(), canonical_json);
            }
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::NodeKind;
    use serde_json::json;

    #[test]
    fn round_trips_after_deleting_an_earlier_node() {
        let mut graph = FlowGraph::new();
        let a = graph.add_node(NodeSettings::default_for(NodeKind::ManualInput)).unwrap();
        let b = graph.add_node(NodeSettings::default_for(NodeKind::ManualInput)).unwrap();
        let c = graph.add_node(NodeSettings::default_for(NodeKind::ManualInput)).unwrap();
        graph.delete_node(a).unwrap();
        graph.connect(b, c, InputLabel::Main).unwrap();

        let doc = FlowDocument::from_graph(FlowId(1), &graph).unwrap();
        let bytes = doc.to_json().unwrap();
        let reloaded = FlowDocument::from_json(&bytes).unwrap();
        let mut rebuilt = reloaded.to_graph().unwrap();

        assert!(rebuilt.node(b).is_ok());
        assert!(rebuilt.node(c).is_ok());
        assert_eq!(rebuilt.inputs_of(c).unwrap(), vec![(InputLabel::Main, b)]);

        // ids survived the round trip, so a node added afterward must not
        // collide with either of them.
        let d = rebuilt.add_node(NodeSettings::default_for(NodeKind::ManualInput)).unwrap();
        assert_ne!(d, b);
        assert_ne!(d, c);
    }

    #[test]
    fn migrates_v0_filter_value_rename() {
        let raw = json!({
            "flow_id": 1,
            "nodes": [{
                "id": 1,
                "settings": {
                    "kind": "filter",
                    "mode": "basic",
                    "column": "amt",
                    "operator": "greater_than",
                    "filter_value": 0,
                    "value2": null
                }
            }],
            "edges": []
        });
        let migrated = migrate_raw(raw).unwrap();
        let settings = &migrated["nodes"][0]["settings"];
        assert_eq!(settings["value"], json!(0));
        assert!(settings.get("filter_value").is_none());
        assert_eq!(migrated["doc_version"], json!(CURRENT_DOC_VERSION));
    }

    #[test]
    fn migrates_legacy_symbol_operator() {
        let raw = json!({
            "doc_version": 1,
            "flow_id": 1,
            "nodes": [{
                "id": 1,
                "settings": {
                    "kind": "filter",
                    "mode": "basic",
                    "column": "amt",
                    "operator": ">=",
                    "value": 0,
                    "value2": null
                }
            }],
            "edges": []
        });
        let migrated = migrate_raw(raw).unwrap();
        assert_eq!(migrated["nodes"][0]["settings"]["operator"], json!("greater_than_or_equals"));
    }

    #[test]
    fn rejects_unknown_legacy_operator() {
        let raw = json!({
            "doc_version": 1,
            "flow_id": 1,
            "nodes": [{
                "id": 1,
                "settings": {
                    "kind": "filter",
                    "mode": "basic",
                    "column": "amt",
                    "operator": "~~~",
                    "value": 0,
                    "value2": null
                }
            }],
            "edges": []
        });
        assert!(migrate_raw(raw).is_err());
    }

    #[test]
    fn current_version_document_is_a_noop_migration() {
        let raw = json!({
            "doc_version": CURRENT_DOC_VERSION,
            "flow_id": 1,
            "nodes": [],
            "edges": []
        });
        let migrated = migrate_raw(raw.clone()).unwrap();
        assert_eq!(migrated, raw);
    }
}
