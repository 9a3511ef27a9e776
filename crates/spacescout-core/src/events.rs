//! Engine-to-view events.
//!
//! The core never depends on any UI type; it emits typed events over a
//! bounded crossbeam channel and whatever registered a receiver consumes
//! them. Progress-style events are sent with `try_send` — a consumer that
//! falls behind loses progress ticks, never correctness, and the engine is
//! never blocked by a slow or absent view.

use crate::model::NodeIndex;
use std::path::PathBuf;
use std::time::Duration;

/// Maximum number of events that may queue up before the consumer drains
/// them. A view draining once per frame has dozens of seconds of headroom;
/// beyond that, progress ticks are dropped.
pub const EVENT_CHANNEL_CAPACITY: usize = 4_096;

/// Typed notifications consumed by the (external) view layer.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A scan or subtree refresh began.
    ScanStarted { path: PathBuf },

    /// Periodic walk progress.
    ScanProgress {
        dirs_read: u64,
        entries_seen: u64,
        current_path: PathBuf,
    },

    /// A non-fatal problem was recovered during the walk (permission
    /// denied, entry vanished). The affected node is flagged in the tree.
    ScanIssue { path: PathBuf, message: String },

    /// The walk finished; aggregates are valid (partial if cancelled).
    ScanFinished {
        cancelled: bool,
        errors: u64,
        duration: Duration,
    },

    /// The tree structure changed at (or below) `node`.
    TreeChanged { generation: u64, node: NodeIndex },

    /// The selection was replaced.
    SelectionChanged { selection: Vec<NodeIndex> },

    /// Any derived layout is stale and must be recomputed.
    LayoutInvalidated { generation: u64 },

    /// The engagement score crossed the current threshold. Fires at most
    /// once per threshold value.
    ThresholdReached { score: u64, threshold: u64 },

    /// One cleanup invocation completed (successfully or not).
    CleanupFinished {
        cleanup_id: String,
        path: PathBuf,
        error: Option<String>,
    },
}

/// Sending half of the engine event channel.
pub type EventSender = crossbeam_channel::Sender<EngineEvent>;

/// Receiving half of the engine event channel.
pub type EventReceiver = crossbeam_channel::Receiver<EngineEvent>;

/// Create a bounded engine event channel.
pub fn channel() -> (EventSender, EventReceiver) {
    crossbeam_channel::bounded(EVENT_CHANNEL_CAPACITY)
}

/// Emit an event without ever blocking the engine. Dropped if the channel
/// is full or the receiver is gone.
pub fn emit(tx: &EventSender, event: EngineEvent) {
    let _ = tx.try_send(event);
}
