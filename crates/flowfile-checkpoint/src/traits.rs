//! Storage abstraction for history snapshots
//!
//! [`SnapshotStore`] is the seam `flowfile-core`'s `HistoryManager` is built
//! on: two independent bounded stacks (undo, redo) of [`HistorySnapshot`].
//! The in-memory implementation in [`crate::memory`] is sufficient for a
//! single process; a deployment that needs history to survive a restart
//! implements this trait against its own storage.

use crate::error::Result;
use crate::snapshot::HistorySnapshot;
use async_trait::async_trait;

/// A bounded, two-stack store for undo/redo snapshots.
///
/// Implementations must enforce `max_depth` by evicting the *oldest* undo
/// entry once the cap is exceeded — the entries closest to the present are
/// the ones `undo()` actually needs.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Push a snapshot onto the undo stack. Implementations enforce the
    /// configured depth cap here.
    async fn push_undo(&self, snapshot: HistorySnapshot) -> Result<()>;

    /// Pop and return the most recent undo snapshot, if any.
    async fn pop_undo(&self) -> Result<Option<HistorySnapshot>>;

    /// Look at the most recent undo snapshot without removing it. Used for
    /// the "hash equals top of undo stack ⇒ no-op" duplicate check.
    async fn peek_undo(&self) -> Result<Option<HistorySnapshot>>;

    /// Push a snapshot onto the redo stack.
    async fn push_redo(&self, snapshot: HistorySnapshot) -> Result<()>;

    /// Pop and return the most recent redo snapshot, if any.
    async fn pop_redo(&self) -> Result<Option<HistorySnapshot>>;

    /// Drop every entry on the redo stack (any fresh mutation invalidates it).
    async fn clear_redo(&self) -> Result<()>;

    /// Number of entries currently on the undo stack.
    async fn undo_depth(&self) -> usize;

    /// Number of entries currently on the redo stack.
    async fn redo_depth(&self) -> usize;
}
