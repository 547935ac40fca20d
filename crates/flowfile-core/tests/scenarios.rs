//! The six concrete end-to-end scenarios, run against the public crate
//! surface rather than any private module.

use async_trait::async_trait;
use flowfile_core::*;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn rows(values: Vec<serde_json::Value>) -> NodeSettings {
    NodeSettings::ManualInput(ManualInputSettings {
        rows: values.into_iter().map(|v| v.as_object().unwrap().clone()).collect(),
    })
}

fn basic_filter(column: &str, op: FilterOperator, value: serde_json::Value) -> NodeSettings {
    NodeSettings::Filter(FilterSettings::Basic(BasicFilter {
        column: column.into(),
        operator: op,
        value: Some(value),
        value2: None,
    }))
}

async fn run(graph: &mut FlowGraph) -> RunStatus {
    let cache = ResultCache::new();
    let events = EventBus::new(FlowId(1));
    run_flow(
        graph,
        &cache,
        &events,
        Arc::new(LocalIngestionBackend),
        Arc::new(ExprCodeSandbox),
        tokio_util::sync::CancellationToken::new(),
        SchedulerConfig::default(),
    )
    .await
    .unwrap()
}

/// 1. Filter then group-by: the zero row is dropped, one row per remaining
/// region survives.
#[tokio::test]
async fn filter_then_group_by() {
    let mut graph = FlowGraph::new();
    let source = graph
        .add_node(rows(vec![
            json!({"region": "N", "amt": 100}),
            json!({"region": "S", "amt": 0}),
            json!({"region": "N", "amt": 50}),
        ]))
        .unwrap();
    let filter = graph.add_node(basic_filter("amt", FilterOperator::GreaterThan, json!(0))).unwrap();
    let group = graph
        .add_node(NodeSettings::GroupBy(GroupBySettings {
            entries: vec![
                GroupByEntry { old_name: "region".into(), aggregation: AggKind::GroupBy, new_name: "region".into() },
                GroupByEntry { old_name: "amt".into(), aggregation: AggKind::Sum, new_name: "total".into() },
            ],
        }))
        .unwrap();
    graph.connect(source, filter, InputLabel::Main).unwrap();
    graph.connect(filter, group, InputLabel::Main).unwrap();

    assert_eq!(run(&mut graph).await, RunStatus::Succeeded);

    let handle = graph.node(group).unwrap().cached_handle().unwrap().clone();
    let df = handle.collect(None).unwrap();
    assert_eq!(df.height(), 1, "only the N region survives the filter");
    let total: i64 = df.column("total").unwrap().i64().unwrap().get(0).unwrap();
    assert_eq!(total, 150);
}

/// 2. Self-join integrity: duplicate keys on both sides of an integrity-
/// checked inner join fail only the join node.
#[tokio::test]
async fn self_join_integrity_violation_is_contained() {
    let mut graph = FlowGraph::new();
    let left = graph
        .add_node(rows(vec![json!({"k": 1, "v": "a"}), json!({"k": 1, "v": "b"})]))
        .unwrap();
    let right = graph
        .add_node(rows(vec![json!({"k": 1, "v": "a"}), json!({"k": 1, "v": "b"})]))
        .unwrap();
    let join = graph
        .add_node(NodeSettings::Join(JoinSettings {
            how: JoinHow::Inner,
            on: vec![JoinColumnPair { left_col: "k".into(), right_col: "k".into() }],
            left_select: None,
            right_select: None,
            integrity_verify: true,
        }))
        .unwrap();
    graph.connect(left, join, InputLabel::Left).unwrap();
    graph.connect(right, join, InputLabel::Right).unwrap();

    assert_eq!(run(&mut graph).await, RunStatus::Failed);

    assert_eq!(graph.node(join).unwrap().state(), flowfile_core::FlowNodeState::Error);
    assert_eq!(graph.node(left).unwrap().state(), flowfile_core::FlowNodeState::Ready);
    assert_eq!(graph.node(right).unwrap().state(), flowfile_core::FlowNodeState::Ready);
}

/// 3. Pivot round-trip: one row per id, one column per (pivoted key,
/// aggregation) combination — a multi-aggregation pivot must not silently
/// drop every aggregation past the first.
#[tokio::test]
async fn pivot_round_trip() {
    let mut graph = FlowGraph::new();
    let source = graph
        .add_node(rows(vec![
            json!({"id": 1, "key": "x", "val": 10}),
            json!({"id": 1, "key": "x", "val": 30}),
            json!({"id": 1, "key": "y", "val": 20}),
        ]))
        .unwrap();
    let pivot = graph
        .add_node(NodeSettings::Pivot(PivotSettings {
            index: vec!["id".into()],
            pivot_column: "key".into(),
            value_column: "val".into(),
            aggregations: vec![AggKind::Sum, AggKind::Max],
        }))
        .unwrap();
    graph.connect(source, pivot, InputLabel::Main).unwrap();

    assert_eq!(run(&mut graph).await, RunStatus::Succeeded);

    let handle = graph.node(pivot).unwrap().cached_handle().unwrap().clone();
    let df = handle.collect(None).unwrap();
    assert_eq!(df.height(), 1);
    assert!(df.column("id").is_ok());
    assert!(df.column("x_sum").is_ok());
    assert!(df.column("y_sum").is_ok());
    assert!(df.column("x_max").is_ok());
    assert!(df.column("y_max").is_ok());
    let x_sum: i64 = df.column("x_sum").unwrap().i64().unwrap().get(0).unwrap();
    let x_max: i64 = df.column("x_max").unwrap().i64().unwrap().get(0).unwrap();
    assert_eq!(x_sum, 40);
    assert_eq!(x_max, 30);
}

/// 4. Undo-redo equivalence: four undos return to the empty document, four
/// redos return to the post-mutation one.
#[tokio::test]
async fn undo_redo_equivalence() {
    let engine = Engine::new();
    let flow = engine.new_flow().await;
    let empty_doc = engine.save_flow(flow).await.unwrap();

    let read = engine.add_node(NodeSettings::default_for(NodeKind::Read)).await.unwrap();
    let filter = engine
        .add_node(basic_filter("amt", FilterOperator::GreaterThan, json!(0)))
        .await
        .unwrap();
    engine.connect(flow, read, filter, InputLabel::Main).await.unwrap();
    engine
        .update_settings(flow, filter, basic_filter("amt", FilterOperator::LessThan, json!(100)))
        .await
        .unwrap();
    let final_doc = engine.save_flow(flow).await.unwrap();

    for _ in 0..4 {
        assert!(engine.undo(flow).await.unwrap());
    }
    assert_eq!(engine.save_flow(flow).await.unwrap(), empty_doc);

    for _ in 0..4 {
        assert!(engine.redo(flow).await.unwrap());
    }
    assert_eq!(engine.save_flow(flow).await.unwrap(), final_doc);
}

/// 5. Cache hit on unchanged subgraph: re-running after touching only the
/// write node's path does not recompute the upstream transform.
#[tokio::test]
async fn cache_hit_on_unchanged_subgraph() {
    let mut graph = FlowGraph::new();
    let source = graph.add_node(rows(vec![json!({"amt": 1}), json!({"amt": 2})])).unwrap();
    let transform = graph
        .add_node(NodeSettings::Sort(SortSettings {
            keys: vec![SortKey { column: "amt".into(), direction: SortDirection::Descending }],
        }))
        .unwrap();
    let out_a = tempfile::NamedTempFile::new().unwrap();
    let write = graph
        .add_node(NodeSettings::Write(WriteSettings {
            path: out_a.path().to_str().unwrap().to_string(),
            format: FileFormat::Csv,
            write_mode: WriteMode::Overwrite,
        }))
        .unwrap();
    graph.connect(source, transform, InputLabel::Main).unwrap();
    graph.connect(transform, write, InputLabel::Main).unwrap();

    let cache = ResultCache::new();
    let first_events = EventBus::new(FlowId(1));
    let first_status = run_flow(
        &mut graph,
        &cache,
        &first_events,
        Arc::new(LocalIngestionBackend),
        Arc::new(ExprCodeSandbox),
        tokio_util::sync::CancellationToken::new(),
        SchedulerConfig::default(),
    )
    .await
    .unwrap();
    assert_eq!(first_status, RunStatus::Succeeded);
    let (_, misses_after_first) = cache.metrics().snapshot();
    assert_eq!(misses_after_first, 3);

    let out_b = tempfile::NamedTempFile::new().unwrap();
    graph
        .update_settings(
            write,
            NodeSettings::Write(WriteSettings {
                path: out_b.path().to_str().unwrap().to_string(),
                format: FileFormat::Csv,
                write_mode: WriteMode::Overwrite,
            }),
        )
        .unwrap();

    let second_events = EventBus::new(FlowId(1));
    let second_status = run_flow(
        &mut graph,
        &cache,
        &second_events,
        Arc::new(LocalIngestionBackend),
        Arc::new(ExprCodeSandbox),
        tokio_util::sync::CancellationToken::new(),
        SchedulerConfig::default(),
    )
    .await
    .unwrap();
    assert_eq!(second_status, RunStatus::Succeeded);
    let (hits, misses_after_second) = cache.metrics().snapshot();
    assert_eq!(misses_after_second, 4, "only the write node recomputes");
    assert_eq!(hits, 2, "source and sort both hit cache on the second run");
}

/// 6. Cancellation is cooperative at node boundaries, not mid-compute: a
/// backend call already in flight runs to completion, but nodes still
/// waiting in the ready queue see the cancellation and stop short. A
/// subsequent uncancelled run succeeds.
struct SlowBackend {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl IngestionBackend for SlowBackend {
    async fn scan_local(&self, _path: &str, _format: FileFormat, _has_header: bool) -> flowfile_core::Result<LazyFrameHandle> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        tokio::time::sleep(Duration::from_millis(150)).await;
        LazyFrameHandle::from_dataframe(polars::df!["amt" => [1i64]].unwrap())
    }
    async fn scan_cloud(&self, _: &str, _: &str, _: FileFormat) -> flowfile_core::Result<LazyFrameHandle> {
        unimplemented!()
    }
    async fn scan_database(&self, _: &str, _: DatabaseDialect, _: &str) -> flowfile_core::Result<LazyFrameHandle> {
        unimplemented!()
    }
    async fn scan_unity_catalog(&self, _: &str, _: &str, _: &str, _: &str) -> flowfile_core::Result<LazyFrameHandle> {
        unimplemented!()
    }
    async fn resolve_connection(&self, _: &str) -> flowfile_core::Result<ConnectionInfo> {
        unimplemented!()
    }
    async fn sink_cloud(&self, _: &str, _: &str, _: FileFormat, _: &LazyFrameHandle) -> flowfile_core::Result<()> {
        unimplemented!()
    }
    async fn sink_database(&self, _: &str, _: DatabaseDialect, _: &str, _: &LazyFrameHandle) -> flowfile_core::Result<()> {
        unimplemented!()
    }
    async fn sink_unity_catalog(&self, _: &str, _: &str, _: &str, _: &str, _: &LazyFrameHandle) -> flowfile_core::Result<()> {
        unimplemented!()
    }
}

#[tokio::test]
async fn cancel_mid_run_then_clean_rerun_succeeds() {
    let mut graph = FlowGraph::new();
    let read = graph.add_node(NodeSettings::default_for(NodeKind::Read)).unwrap();
    let filter = graph.add_node(basic_filter("amt", FilterOperator::GreaterThan, json!(0))).unwrap();
    graph.connect(read, filter, InputLabel::Main).unwrap();

    let cache = ResultCache::new();
    let events = EventBus::new(FlowId(1));
    let calls = Arc::new(AtomicUsize::new(0));
    let backend = Arc::new(SlowBackend { calls: calls.clone() });
    let token = tokio_util::sync::CancellationToken::new();

    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let status = run_flow(
        &mut graph,
        &cache,
        &events,
        backend,
        Arc::new(ExprCodeSandbox),
        token,
        SchedulerConfig::default(),
    )
    .await
    .unwrap();

    assert_eq!(status, RunStatus::Cancelled);
    assert_eq!(calls.load(Ordering::Relaxed), 1, "the in-flight read ran to completion");
    assert_eq!(graph.node(read).unwrap().state(), flowfile_core::FlowNodeState::Ready);
    assert_eq!(graph.node(filter).unwrap().state(), flowfile_core::FlowNodeState::Error);

    let status = run_flow(
        &mut graph,
        &cache,
        &events,
        Arc::new(SlowBackend { calls }),
        Arc::new(ExprCodeSandbox),
        tokio_util::sync::CancellationToken::new(),
        SchedulerConfig::default(),
    )
    .await
    .unwrap();
    assert_eq!(status, RunStatus::Succeeded);
}
