//! Property tests for the two invariants in §8 that are awkward to pin down
//! with a single example: acyclicity under arbitrary connect/disconnect
//! sequences, and fingerprint stability across a document round-trip.

use flowfile_core::*;
use proptest::prelude::*;

fn source_settings() -> NodeSettings {
    NodeSettings::ManualInput(ManualInputSettings { rows: vec![] })
}

fn filter_settings(threshold: i64) -> NodeSettings {
    NodeSettings::Filter(FilterSettings::Basic(BasicFilter {
        column: "amt".into(),
        operator: FilterOperator::GreaterThan,
        value: Some(serde_json::json!(threshold)),
        value2: None,
    }))
}

/// One step in a random mutation sequence over a small fixed pool of nodes.
#[derive(Debug, Clone, Copy)]
enum Step {
    Connect { from: usize, to: usize },
    Disconnect { from: usize, to: usize },
}

fn step_strategy(pool_size: usize) -> impl Strategy<Value = Step> {
    let idx = 0..pool_size;
    prop_oneof![
        (idx.clone(), idx.clone()).prop_map(|(from, to)| Step::Connect { from, to }),
        (idx.clone(), idx).prop_map(|(from, to)| Step::Disconnect { from, to }),
    ]
}

proptest! {
    /// However connect/disconnect are interleaved, every `connect` call that
    /// succeeds leaves the graph acyclic: `topological_order` always finds
    /// one.
    #[test]
    fn acyclic_under_arbitrary_mutation_sequences(steps in prop::collection::vec(step_strategy(5), 0..40)) {
        let mut graph = FlowGraph::new();
        let nodes: Vec<NodeId> = (0..5)
            .map(|i| graph.add_node(filter_settings(i as i64)).unwrap())
            .collect();

        for step in steps {
            match step {
                Step::Connect { from, to } => {
                    if from == to {
                        continue;
                    }
                    let _ = graph.connect(nodes[from], nodes[to], InputLabel::Main);
                }
                Step::Disconnect { from, to } => {
                    if from == to {
                        continue;
                    }
                    let _ = graph.disconnect(nodes[from], nodes[to], InputLabel::Main);
                }
            }
            prop_assert!(graph.topological_order().is_ok());
        }
    }

    /// A settings-preserving round-trip through the document format (serialize,
    /// deserialize, rebuild the graph) never changes a node's fingerprint.
    #[test]
    fn fingerprint_is_stable_across_document_round_trip(threshold in -1000i64..1000) {
        let mut graph = FlowGraph::new();
        let source = graph.add_node(source_settings()).unwrap();
        let filter = graph.add_node(filter_settings(threshold)).unwrap();
        graph.connect(source, filter, InputLabel::Main).unwrap();

        let before = graph.fingerprint_of(filter).unwrap();

        let document = FlowDocument::from_graph(FlowId(1), &graph).unwrap();
        let bytes = document.to_json().unwrap();
        let reloaded_document = FlowDocument::from_json(&bytes).unwrap();
        let reloaded_graph = reloaded_document.to_graph().unwrap();

        let after = reloaded_graph.fingerprint_of(filter).unwrap();
        prop_assert_eq!(before, after);
    }
}
