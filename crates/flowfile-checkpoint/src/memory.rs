//! In-memory [`SnapshotStore`] implementation
//!
//! Backs a single `FlowGraph`'s history. Not shared across processes and not
//! persisted across restarts — see [`crate::traits::SnapshotStore`] for the
//! seam a persistent backend would implement instead.

use crate::error::Result;
use crate::snapshot::HistorySnapshot;
use crate::traits::SnapshotStore;
use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::sync::RwLock;

/// Default max stack depth, per §4.5.
pub const DEFAULT_MAX_DEPTH: usize = 50;

/// Thread-safe in-memory undo/redo stacks.
#[derive(Debug)]
pub struct InMemorySnapshotStore {
    max_depth: usize,
    undo: RwLock<VecDeque<HistorySnapshot>>,
    redo: RwLock<VecDeque<HistorySnapshot>>,
}

impl InMemorySnapshotStore {
    /// Create a store with the default max depth (50).
    pub fn new() -> Self {
        Self::with_max_depth(DEFAULT_MAX_DEPTH)
    }

    /// Create a store with an explicit max depth.
    pub fn with_max_depth(max_depth: usize) -> Self {
        Self {
            max_depth,
            undo: RwLock::new(VecDeque::new()),
            redo: RwLock::new(VecDeque::new()),
        }
    }
}

impl Default for InMemorySnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn push_undo(&self, snapshot: HistorySnapshot) -> Result<()> {
        let mut undo = self.undo.write().await;
        undo.push_back(snapshot);
        while undo.len() > self.max_depth {
            undo.pop_front();
        }
        Ok(())
    }

    async fn pop_undo(&self) -> Result<Option<HistorySnapshot>> {
        Ok(self.undo.write().await.pop_back())
    }

    async fn peek_undo(&self) -> Result<Option<HistorySnapshot>> {
        Ok(self.undo.read().await.back().cloned())
    }

    async fn push_redo(&self, snapshot: HistorySnapshot) -> Result<()> {
        let mut redo = self.redo.write().await;
        redo.push_back(snapshot);
        while redo.len() > self.max_depth {
            redo.pop_front();
        }
        Ok(())
    }

    async fn pop_redo(&self) -> Result<Option<HistorySnapshot>> {
        Ok(self.redo.write().await.pop_back())
    }

    async fn clear_redo(&self) -> Result<()> {
        self.redo.write().await.clear();
        Ok(())
    }

    async fn undo_depth(&self) -> usize {
        self.undo.read().await.len()
    }

    async fn redo_depth(&self) -> usize {
        self.redo.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::HistorySnapshot;

    fn snap(reason: &str) -> HistorySnapshot {
        HistorySnapshot::capture(reason.as_bytes().to_vec(), reason, false).unwrap()
    }

    #[tokio::test]
    async fn push_then_pop_is_lifo() {
        let store = InMemorySnapshotStore::new();
        store.push_undo(snap("a")).await.unwrap();
        store.push_undo(snap("b")).await.unwrap();

        let top = store.pop_undo().await.unwrap().unwrap();
        assert_eq!(top.reason, "b");
        let next = store.pop_undo().await.unwrap().unwrap();
        assert_eq!(next.reason, "a");
        assert!(store.pop_undo().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn depth_cap_evicts_oldest() {
        let store = InMemorySnapshotStore::with_max_depth(2);
        store.push_undo(snap("1")).await.unwrap();
        store.push_undo(snap("2")).await.unwrap();
        store.push_undo(snap("3")).await.unwrap();

        assert_eq!(store.undo_depth().await, 2);
        let top = store.pop_undo().await.unwrap().unwrap();
        assert_eq!(top.reason, "3");
        let next = store.pop_undo().await.unwrap().unwrap();
        assert_eq!(next.reason, "2");
    }

    #[tokio::test]
    async fn clear_redo_empties_stack() {
        let store = InMemorySnapshotStore::new();
        store.push_redo(snap("a")).await.unwrap();
        store.clear_redo().await.unwrap();
        assert_eq!(store.redo_depth().await, 0);
    }

    #[tokio::test]
    async fn peek_does_not_remove() {
        let store = InMemorySnapshotStore::new();
        store.push_undo(snap("a")).await.unwrap();
        let peeked = store.peek_undo().await.unwrap().unwrap();
        assert_eq!(peeked.reason, "a");
        assert_eq!(store.undo_depth().await, 1);
    }
}
