//! Run-status events (§6): a monotonically sequenced stream a caller
//! subscribes to for progress, published over a `tokio::sync::broadcast`
//! channel so every subscriber sees the same events independently of when
//! it joined.

use crate::ids::{FlowId, NodeId};
use crate::node::Fingerprint;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::Level;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Failed,
    Cancelled,
}

/// The payload of one run-status event, carrying a monotonic `sequence`
/// number so a consumer can detect gaps or reorder buffered events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    pub sequence: u64,
    pub flow: FlowId,
    pub kind: RunEventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEventKind {
    RunStarted,
    RunFinished { status: RunStatus },
    NodeStarted { node: NodeId },
    NodeFinished { node: NodeId, fingerprint: Fingerprint, row_count: Option<usize> },
    NodeFailed { node: NodeId, message: String },
    Log {
        #[serde(with = "level_serde")]
        level: LogLevel,
        message: String,
    },
}

/// A `tracing`-compatible level, mirrored here so `RunEventKind::Log` stays
/// serializable without pulling `tracing::Level` through serde directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

mod level_serde {
    use super::LogLevel;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(level: &LogLevel, s: S) -> Result<S::Ok, S::Error> {
        level.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<LogLevel, D::Error> {
        LogLevel::deserialize(d)
    }
}

const EVENT_BUFFER_CAPACITY: usize = 1024;

/// Publishes a flow's run events and hands out subscriptions. Sequence
/// numbers are per-bus, monotonic, and never reset.
pub struct EventBus {
    flow: FlowId,
    sequence: AtomicU64,
    sender: broadcast::Sender<RunEvent>,
}

impl EventBus {
    pub fn new(flow: FlowId) -> Self {
        let (sender, _receiver) = broadcast::channel(EVENT_BUFFER_CAPACITY);
        EventBus {
            flow,
            sequence: AtomicU64::new(0),
            sender,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Returns the number of active subscribers (not an
    /// error condition if zero — a run proceeds whether or not anyone is
    /// watching).
    pub fn publish(&self, kind: RunEventKind) -> usize {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let event = RunEvent {
            sequence,
            flow: self.flow,
            kind,
        };
        self.sender.send(event).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_in_sequence_order() {
        let bus = EventBus::new(FlowId(1));
        let mut rx = bus.subscribe();
        bus.publish(RunEventKind::RunStarted);
        bus.publish(RunEventKind::NodeStarted { node: NodeId(1) });
        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.sequence, 0);
        assert_eq!(second.sequence, 1);
    }

    #[test]
    fn publish_without_subscribers_does_not_error() {
        let bus = EventBus::new(FlowId(1));
        assert_eq!(bus.publish(RunEventKind::RunStarted), 0);
    }
}
