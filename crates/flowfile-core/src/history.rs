//! `HistoryManager` — undo/redo over whole-document snapshots (§4.5),
//! composing [`flowfile_checkpoint::SnapshotStore`] rather than reimplementing
//! stack bookkeeping here.

use crate::error::Result;
use flowfile_checkpoint::{hash_document, HistorySnapshot, SnapshotStore};
use std::sync::Arc;

pub struct HistoryManager {
    store: Arc<dyn SnapshotStore>,
    compress: bool,
}

impl HistoryManager {
    pub fn new(store: Arc<dyn SnapshotStore>, compress: bool) -> Self {
        HistoryManager { store, compress }
    }

    /// Capture `document` as an undo point, clearing the redo stack (a new
    /// action invalidates any redo history). A capture identical to the most
    /// recent undo entry is skipped (`capture_if_changed`, §4.5) and returns
    /// `Ok(false)`.
    pub async fn capture(&self, document: &[u8], reason: impl Into<String>) -> Result<bool> {
        if let Some(top) = self.store.peek_undo().await? {
            if top.hash == hash_document(document) {
                return Ok(false);
            }
        }
        let snapshot = HistorySnapshot::capture(document.to_vec(), reason, self.compress)?;
        self.store.push_undo(snapshot).await?;
        self.store.clear_redo().await?;
        Ok(true)
    }

    /// Move the current undo-stack top to redo and return the document
    /// beneath it (the state to restore to). The top of the undo stack is
    /// always the most recently captured "current" state, so undoing means
    /// retiring it to redo and exposing whatever is now on top.
    ///
    /// Returns `Ok(None)` if there is nothing to undo: either the stack is
    /// empty, or the entry just popped was the oldest recorded checkpoint
    /// (put back in that case, since there's nothing earlier to reveal).
    pub async fn undo(&self) -> Result<Option<Vec<u8>>> {
        let Some(current) = self.store.pop_undo().await? else {
            return Ok(None);
        };
        match self.store.peek_undo().await? {
            Some(previous) => {
                self.store.push_redo(current).await?;
                Ok(Some(previous.document_bytes()?))
            }
            None => {
                self.store.push_undo(current).await?;
                Ok(None)
            }
        }
    }

    /// Inverse of [`undo`](Self::undo): move the most recently undone state
    /// back onto the undo stack and return it.
    pub async fn redo(&self) -> Result<Option<Vec<u8>>> {
        let Some(next) = self.store.pop_redo().await? else {
            return Ok(None);
        };
        let bytes = next.document_bytes()?;
        self.store.push_undo(next).await?;
        Ok(Some(bytes))
    }

    pub async fn undo_depth(&self) -> usize {
        self.store.undo_depth().await
    }

    pub async fn redo_depth(&self) -> usize {
        self.store.redo_depth().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowfile_checkpoint::InMemorySnapshotStore;

    fn manager() -> HistoryManager {
        HistoryManager::new(Arc::new(InMemorySnapshotStore::new()), false)
    }

    #[tokio::test]
    async fn undo_then_redo_restores_original() {
        let history = manager();
        let v1 = b"version-1".to_vec();
        let v2 = b"version-2".to_vec();
        history.capture(&v1, "initial").await.unwrap();
        history.capture(&v2, "edit").await.unwrap();

        let restored = history.undo().await.unwrap().unwrap();
        assert_eq!(restored, v1);

        let redone = history.redo().await.unwrap().unwrap();
        assert_eq!(redone, v2);
    }

    #[tokio::test]
    async fn capture_skips_identical_document() {
        let history = manager();
        let v1 = b"same".to_vec();
        assert!(history.capture(&v1, "first").await.unwrap());
        assert!(!history.capture(&v1, "second").await.unwrap());
        assert_eq!(history.undo_depth().await, 1);
    }

    #[tokio::test]
    async fn new_capture_clears_redo() {
        let history = manager();
        let v1 = b"v1".to_vec();
        let v2 = b"v2".to_vec();
        let v3 = b"v3".to_vec();
        history.capture(&v1, "1").await.unwrap();
        history.capture(&v2, "2").await.unwrap();
        history.undo().await.unwrap();
        assert_eq!(history.redo_depth().await, 1);
        history.capture(&v3, "3").await.unwrap();
        assert_eq!(history.redo_depth().await, 0);
    }
}
