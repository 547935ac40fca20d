//! `Engine` — the public entry point (§6): owns every open flow, enforces
//! the one-writer-at-a-time rule (§7's `Busy` policy) via a per-flow
//! `try_lock`, and wires together the graph, cache, history, and event bus
//! for each one.

use crate::cache::ResultCache;
use crate::codegen;
use crate::document::FlowDocument;
use crate::edge::InputLabel;
use crate::error::{FlowfileError, Result};
use crate::events::{EventBus, RunEvent, RunStatus};
use crate::graph::FlowGraph;
use crate::history::HistoryManager;
use crate::ids::{FlowId, IdSequence, NodeId};
use crate::ingestion::{IngestionBackend, LocalIngestionBackend};
use crate::sandbox::{CodeSandbox, ExprCodeSandbox};
use crate::scheduler::{self, SchedulerConfig};
use crate::settings::NodeSettings;
use flowfile_checkpoint::InMemorySnapshotStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

struct FlowState {
    graph: FlowGraph,
    cache: ResultCache,
    history: HistoryManager,
}

struct FlowHandle {
    events: Arc<EventBus>,
    state: Mutex<FlowState>,
    cancellation: Mutex<Option<CancellationToken>>,
}

pub struct Engine {
    flow_ids: IdSequence,
    flows: RwLock<HashMap<FlowId, Arc<FlowHandle>>>,
    ingestion: Arc<dyn IngestionBackend>,
    sandbox: Arc<dyn CodeSandbox>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

/// Seed a freshly created flow's history with its initial document, so an
/// undo of the very first real mutation has a baseline to restore to.
async fn seed_history(flow: FlowId, state: &FlowState) -> Result<()> {
    let bytes = FlowDocument::from_graph(flow, &state.graph)?.to_json()?;
    state.history.capture(&bytes, "initial").await?;
    Ok(())
}

impl Engine {
    pub fn new() -> Self {
        Self::with_backends(Arc::new(LocalIngestionBackend), Arc::new(ExprCodeSandbox))
    }

    pub fn with_backends(ingestion: Arc<dyn IngestionBackend>, sandbox: Arc<dyn CodeSandbox>) -> Self {
        Engine {
            flow_ids: IdSequence::new(),
            flows: RwLock::new(HashMap::new()),
            ingestion,
            sandbox,
        }
    }

    async fn handle_for(&self, flow: FlowId) -> Result<Arc<FlowHandle>> {
        self.flows
            .read()
            .await
            .get(&flow)
            .cloned()
            .ok_or_else(|| FlowfileError::NotFound(flow.to_string()))
    }

    pub async fn new_flow(&self) -> FlowId {
        let id = FlowId(self.flow_ids.next());
        let state = FlowState {
            graph: FlowGraph::new(),
            cache: ResultCache::new(),
            history: HistoryManager::new(Arc::new(InMemorySnapshotStore::new()), true),
        };
        seed_history(id, &state).await.ok();
        let handle = Arc::new(FlowHandle {
            events: Arc::new(EventBus::new(id)),
            state: Mutex::new(state),
            cancellation: Mutex::new(None),
        });
        self.flows.write().await.insert(id, handle);
        id
    }

    /// Load a serialized document (migrated if needed) as a new in-memory
    /// flow, keyed by the id it was saved under.
    pub async fn load_flow(&self, bytes: &[u8]) -> Result<FlowId> {
        let document = FlowDocument::from_json(bytes)?;
        let flow_id = document.flow_id;
        let graph = document.to_graph()?;
        let state = FlowState {
            graph,
            cache: ResultCache::new(),
            history: HistoryManager::new(Arc::new(InMemorySnapshotStore::new()), true),
        };
        seed_history(flow_id, &state).await?;
        let handle = Arc::new(FlowHandle {
            events: Arc::new(EventBus::new(flow_id)),
            state: Mutex::new(state),
            cancellation: Mutex::new(None),
        });
        self.flows.write().await.insert(flow_id, handle);
        Ok(flow_id)
    }

    pub async fn save_flow(&self, flow: FlowId) -> Result<Vec<u8>> {
        let handle = self.handle_for(flow).await?;
        let state = handle.state.try_lock().map_err(|_| FlowfileError::Busy)?;
        FlowDocument::from_graph(flow, &state.graph)?.to_json()
    }

    /// Capture `state`'s current document as the new undo-stack top. Always
    /// called after a mutation so the top of the stack mirrors the live
    /// graph; undo/redo then walk the stack below that.
    async fn capture(&self, flow: FlowId, state: &FlowState, reason: &str) -> Result<()> {
        let bytes = FlowDocument::from_graph(flow, &state.graph)?.to_json()?;
        state.history.capture(&bytes, reason).await?;
        Ok(())
    }

    pub async fn add_node(&self, flow: FlowId, settings: NodeSettings) -> Result<NodeId> {
        let handle = self.handle_for(flow).await?;
        let mut state = handle.state.try_lock().map_err(|_| FlowfileError::Busy)?;
        let id = state.graph.add_node(settings)?;
        self.capture(flow, &state, "add_node").await?;
        Ok(id)
    }

    pub async fn delete_node(&self, flow: FlowId, node: NodeId) -> Result<()> {
        let handle = self.handle_for(flow).await?;
        let mut state = handle.state.try_lock().map_err(|_| FlowfileError::Busy)?;
        state.graph.delete_node(node)?;
        self.capture(flow, &state, "delete_node").await?;
        Ok(())
    }

    pub async fn connect(&self, flow: FlowId, source: NodeId, target: NodeId, label: InputLabel) -> Result<()> {
        let handle = self.handle_for(flow).await?;
        let mut state = handle.state.try_lock().map_err(|_| FlowfileError::Busy)?;
        state.graph.connect(source, target, label)?;
        self.capture(flow, &state, "connect").await?;
        Ok(())
    }

    pub async fn disconnect(&self, flow: FlowId, source: NodeId, target: NodeId, label: InputLabel) -> Result<()> {
        let handle = self.handle_for(flow).await?;
        let mut state = handle.state.try_lock().map_err(|_| FlowfileError::Busy)?;
        state.graph.disconnect(source, target, label)?;
        self.capture(flow, &state, "disconnect").await?;
        Ok(())
    }

    pub async fn update_settings(&self, flow: FlowId, node: NodeId, settings: NodeSettings) -> Result<()> {
        let handle = self.handle_for(flow).await?;
        let mut state = handle.state.try_lock().map_err(|_| FlowfileError::Busy)?;
        state.graph.update_settings(node, settings)?;
        self.capture(flow, &state, "update_settings").await?;
        Ok(())
    }

    pub async fn clear_cache(&self, flow: FlowId) -> Result<()> {
        let handle = self.handle_for(flow).await?;
        let state = handle.state.try_lock().map_err(|_| FlowfileError::Busy)?;
        state.cache.clear();
        Ok(())
    }

    pub async fn generate_code(&self, flow: FlowId) -> Result<String> {
        let handle = self.handle_for(flow).await?;
        let state = handle.state.try_lock().map_err(|_| FlowfileError::Busy)?;
        codegen::generate_code(&state.graph)
    }

    pub async fn subscribe(&self, flow: FlowId) -> Result<broadcast::Receiver<RunEvent>> {
        let handle = self.handle_for(flow).await?;
        Ok(handle.events.subscribe())
    }

    /// Cancel a flow's in-progress run, if any. A no-op if nothing is
    /// running (cancellation is a request, not an error path).
    pub async fn cancel(&self, flow: FlowId) -> Result<()> {
        let handle = self.handle_for(flow).await?;
        if let Some(token) = handle.cancellation.lock().await.as_ref() {
            token.cancel();
        }
        Ok(())
    }

    pub async fn run(&self, flow: FlowId) -> Result<RunStatus> {
        let handle = self.handle_for(flow).await?;
        let mut state = handle.state.try_lock().map_err(|_| FlowfileError::Busy)?;
        let token = CancellationToken::new();
        *handle.cancellation.lock().await = Some(token.clone());
        let result = scheduler::run_flow(
            &mut state.graph,
            &state.cache,
            &handle.events,
            self.ingestion.clone(),
            self.sandbox.clone(),
            token,
            SchedulerConfig::default(),
        )
        .await;
        *handle.cancellation.lock().await = None;
        result
    }

    pub async fn undo(&self, flow: FlowId) -> Result<bool> {
        let handle = self.handle_for(flow).await?;
        let mut state = handle.state.try_lock().map_err(|_| FlowfileError::Busy)?;
        match state.history.undo().await? {
            Some(restored) => {
                state.graph = FlowDocument::from_json(&restored)?.to_graph()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn redo(&self, flow: FlowId) -> Result<bool> {
        let handle = self.handle_for(flow).await?;
        let mut state = handle.state.try_lock().map_err(|_| FlowfileError::Busy)?;
        match state.history.redo().await? {
            Some(restored) => {
                state.graph = FlowDocument::from_json(&restored)?.to_graph()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{ManualInputSettings, NodeKind};

    fn manual_rows(n: i64) -> NodeSettings {
        NodeSettings::ManualInput(ManualInputSettings {
            rows: vec![serde_json::json!({"amt": n}).as_object().unwrap().clone()],
        })
    }

    #[tokio::test]
    async fn add_node_then_save_round_trips_through_load() {
        let engine = Engine::new();
        let flow = engine.new_flow().await;
        let node = engine.add_node(flow, NodeSettings::default_for(NodeKind::ManualInput)).await.unwrap();
        let bytes = engine.save_flow(flow).await.unwrap();
        let reloaded = engine.load_flow(&bytes).await.unwrap();
        assert_eq!(reloaded, flow);
        let code = engine.generate_code(reloaded).await.unwrap();
        assert!(code.contains(&format!("node_{}", node.0)));
    }

    #[tokio::test]
    async fn undo_reverts_last_mutation() {
        let engine = Engine::new();
        let flow = engine.new_flow().await;
        let node = engine.add_node(flow, manual_rows(1)).await.unwrap();
        engine.update_settings(flow, node, manual_rows(2)).await.unwrap();

        let undone = engine.undo(flow).await.unwrap();
        assert!(undone);
        let bytes = engine.save_flow(flow).await.unwrap();
        let doc = FlowDocument::from_json(&bytes).unwrap();
        let NodeSettings::ManualInput(settings) = &doc.nodes[0].settings else {
            panic!("expected manual input settings");
        };
        assert_eq!(settings.rows[0]["amt"], serde_json::json!(1));
    }

    #[tokio::test]
    async fn run_and_cancel_do_not_panic_on_empty_flow() {
        let engine = Engine::new();
        let flow = engine.new_flow().await;
        let status = engine.run(flow).await.unwrap();
        assert_eq!(status, RunStatus::Succeeded);
        engine.cancel(flow).await.unwrap();
    }

    #[tokio::test]
    async fn not_found_flow_returns_error() {
        let engine = Engine::new();
        assert!(engine.save_flow(FlowId(999)).await.is_err());
    }
}
