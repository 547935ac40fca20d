//! Runs a [`FlowGraph`] to completion (§4.4): a bounded worker pool over the
//! graph's dependency order, cancellable mid-run, where one node's failure
//! fails only its descendants and leaves independent branches to finish.

use crate::cache::ResultCache;
use crate::compute::{compute_node, NodeInputs};
use crate::edge::InputLabel;
use crate::error::{FlowfileError, Result};
use crate::events::{EventBus, RunEventKind, RunStatus};
use crate::graph::FlowGraph;
use crate::ids::NodeId;
use crate::ingestion::IngestionBackend;
use crate::sandbox::CodeSandbox;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub max_concurrency: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig { max_concurrency: 4 }
    }
}

type ComputeResult = (NodeId, Result<crate::handle::LazyFrameHandle>);

/// Run every node in `graph`, returning the overall status. `graph` is
/// mutated in place: each node's state/cache/error is updated as the run
/// progresses, so a caller can inspect partial progress even after a
/// cancellation.
pub async fn run_flow(
    graph: &mut FlowGraph,
    cache: &ResultCache,
    events: &EventBus,
    ingestion: Arc<dyn IngestionBackend>,
    sandbox: Arc<dyn CodeSandbox>,
    cancellation: CancellationToken,
    config: SchedulerConfig,
) -> Result<RunStatus> {
    events.publish(RunEventKind::RunStarted);

    let mut in_degree: HashMap<NodeId, usize> = HashMap::new();
    for node in graph.nodes() {
        in_degree.insert(node.id, graph.inputs_of(node.id)?.len());
    }
    let mut ready: VecDeque<NodeId> = in_degree
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(id, _)| *id)
        .collect();

    let mut failed: HashSet<NodeId> = HashSet::new();
    let semaphore = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
    let mut join_set: JoinSet<ComputeResult> = JoinSet::new();
    let mut cancelled = false;

    loop {
        if cancellation.is_cancelled() {
            cancelled = true;
        }

        while let Some(node_id) = ready.pop_front() {
            if failed.contains(&node_id) {
                continue;
            }
            if cancelled {
                mark_cancelled(graph, node_id)?;
                continue;
            }

            let upstream_edges = graph.inputs_of(node_id)?;
            let mut inputs = NodeInputs::default();
            let mut blocked_by = None;
            for (label, source) in &upstream_edges {
                if failed.contains(source) {
                    blocked_by = Some(*source);
                    break;
                }
                let handle = graph
                    .node(*source)?
                    .cached_handle()
                    .cloned()
                    .ok_or_else(|| FlowfileError::Engine(format!("node {source} has no cached result")))?;
                match label {
                    InputLabel::Main => inputs.main.push(handle),
                    InputLabel::Left => inputs.left = Some(handle),
                    InputLabel::Right => inputs.right = Some(handle),
                }
            }

            if let Some(upstream) = blocked_by {
                fail_node(graph, events, node_id, FlowfileError::UpstreamSchema { node: node_id, upstream })?;
                failed.insert(node_id);
                propagate_failure(graph, events, &mut failed, node_id)?;
                continue;
            }

            graph.node_mut(node_id)?.mark_computing();
            events.publish(RunEventKind::NodeStarted { node: node_id });

            let settings = graph.node(node_id)?.settings.clone();
            let fingerprint = graph.fingerprint_of(node_id)?;
            let cache = cache.clone();
            let ingestion = ingestion.clone();
            let sandbox = sandbox.clone();
            let permit_semaphore = semaphore.clone();
            let token = cancellation.clone();

            join_set.spawn(async move {
                let _permit = permit_semaphore.acquire_owned().await;
                if token.is_cancelled() {
                    return (node_id, Err(FlowfileError::eval(node_id, crate::error::EvalErrorKind::Cancelled, "run was cancelled")));
                }
                let result = cache
                    .get_or_compute(fingerprint, || async {
                        compute_node(node_id, &settings, &inputs, ingestion.as_ref(), sandbox.as_ref()).await
                    })
                    .await;
                (node_id, result)
            });
        }

        let Some(joined) = join_set.join_next().await else {
            break;
        };
        let (node_id, result) = joined.map_err(|e| FlowfileError::Engine(format!("node task panicked: {e}")))?;

        match result {
            Ok(handle) => {
                let fingerprint = graph.fingerprint_of(node_id)?;
                let row_count = handle.row_count_hint();
                graph.node_mut(node_id)?.mark_ready(handle, fingerprint.clone());
                info!(node = %node_id, %fingerprint, "node finished");
                events.publish(RunEventKind::NodeFinished {
                    node: node_id,
                    fingerprint,
                    row_count,
                });
                for child in graph.outputs_of(node_id)? {
                    if let Some(count) = in_degree.get_mut(&child) {
                        *count = count.saturating_sub(1);
                        if *count == 0 {
                            ready.push_back(child);
                        }
                    }
                }
            }
            Err(error) => {
                warn!(node = %node_id, error = %error, "node failed");
                fail_node(graph, events, node_id, error)?;
                failed.insert(node_id);
                propagate_failure(graph, events, &mut failed, node_id)?;
            }
        }
    }

    let status = if cancelled {
        RunStatus::Cancelled
    } else if failed.is_empty() {
        RunStatus::Succeeded
    } else {
        RunStatus::Failed
    };
    events.publish(RunEventKind::RunFinished { status });
    Ok(status)
}

fn fail_node(graph: &mut FlowGraph, events: &EventBus, node_id: NodeId, error: FlowfileError) -> Result<()> {
    let message = error.to_string();
    graph.node_mut(node_id)?.mark_error(&error);
    events.publish(RunEventKind::NodeFailed { node: node_id, message });
    Ok(())
}

/// Eagerly mark every descendant of a failed node as failed too, so the
/// ready-queue loop skips them outright instead of discovering the failure
/// one hop at a time.
fn propagate_failure(graph: &mut FlowGraph, events: &EventBus, failed: &mut HashSet<NodeId>, origin: NodeId) -> Result<()> {
    for descendant in graph.descendants(origin)? {
        if failed.insert(descendant) {
            let error = FlowfileError::UpstreamSchema {
                node: descendant,
                upstream: origin,
            };
            fail_node(graph, events, descendant, error)?;
        }
    }
    Ok(())
}

fn mark_cancelled(graph: &mut FlowGraph, node_id: NodeId) -> Result<()> {
    let error = FlowfileError::eval(node_id, crate::error::EvalErrorKind::Cancelled, "run was cancelled");
    graph.node_mut(node_id)?.mark_error(&error);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::FlowId;
    use crate::ingestion::LocalIngestionBackend;
    use crate::ops::FilterOperator;
    use crate::sandbox::ExprCodeSandbox;
    use crate::settings::{BasicFilter, FilterSettings, ManualInputSettings, NodeSettings};
    use serde_json::json;

    fn manual_rows(rows: Vec<serde_json::Value>) -> NodeSettings {
        NodeSettings::ManualInput(ManualInputSettings {
            rows: rows.into_iter().map(|v| v.as_object().unwrap().clone()).collect(),
        })
    }

    #[tokio::test]
    async fn successful_run_marks_every_node_ready() {
        let mut graph = FlowGraph::new();
        let source = graph
            .add_node(manual_rows(vec![json!({"amt": 10}), json!({"amt": -5})]))
            .unwrap();
        let filter = graph
            .add_node(NodeSettings::Filter(FilterSettings::Basic(BasicFilter {
                column: "amt".into(),
                operator: FilterOperator::GreaterThan,
                value: Some(json!(0)),
                value2: None,
            })))
            .unwrap();
        graph.connect(source, filter, InputLabel::Main).unwrap();

        let cache = ResultCache::new();
        let events = EventBus::new(FlowId(1));
        let status = run_flow(
            &mut graph,
            &cache,
            &events,
            Arc::new(LocalIngestionBackend),
            Arc::new(ExprCodeSandbox),
            CancellationToken::new(),
            SchedulerConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(status, RunStatus::Succeeded);
        assert_eq!(graph.node(filter).unwrap().state(), crate::node::FlowNodeState::Ready);
    }

    #[tokio::test]
    async fn failure_propagates_to_descendants_but_not_siblings() {
        let mut graph = FlowGraph::new();
        let bad_source = graph.add_node(manual_rows(vec![json!({"amt": 1})])).unwrap();
        let good_source = graph.add_node(manual_rows(vec![json!({"amt": 1})])).unwrap();
        let downstream_of_bad = graph
            .add_node(NodeSettings::Filter(FilterSettings::Basic(BasicFilter {
                column: "missing_column".into(),
                operator: FilterOperator::GreaterThan,
                value: Some(json!(0)),
                value2: None,
            })))
            .unwrap();
        let downstream_of_good = graph
            .add_node(NodeSettings::Filter(FilterSettings::Basic(BasicFilter {
                column: "amt".into(),
                operator: FilterOperator::GreaterThan,
                value: Some(json!(0)),
                value2: None,
            })))
            .unwrap();
        graph.connect(bad_source, downstream_of_bad, InputLabel::Main).unwrap();
        graph.connect(good_source, downstream_of_good, InputLabel::Main).unwrap();

        let cache = ResultCache::new();
        let events = EventBus::new(FlowId(1));
        let status = run_flow(
            &mut graph,
            &cache,
            &events,
            Arc::new(LocalIngestionBackend),
            Arc::new(ExprCodeSandbox),
            CancellationToken::new(),
            SchedulerConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(status, RunStatus::Failed);
        assert_eq!(graph.node(downstream_of_good).unwrap().state(), crate::node::FlowNodeState::Ready);
        assert_eq!(graph.node(downstream_of_bad).unwrap().state(), crate::node::FlowNodeState::Error);
    }

    #[tokio::test]
    async fn cancellation_before_start_marks_run_cancelled() {
        let mut graph = FlowGraph::new();
        graph.add_node(manual_rows(vec![json!({"amt": 1})])).unwrap();

        let cache = ResultCache::new();
        let events = EventBus::new(FlowId(1));
        let token = CancellationToken::new();
        token.cancel();
        let status = run_flow(
            &mut graph,
            &cache,
            &events,
            Arc::new(LocalIngestionBackend),
            Arc::new(ExprCodeSandbox),
            token,
            SchedulerConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(status, RunStatus::Cancelled);
    }
}
