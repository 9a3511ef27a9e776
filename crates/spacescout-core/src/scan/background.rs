//! Background scanning against a shared live tree.
//!
//! A worker thread steps a [`ScanJob`] while the tree lives behind an
//! `Arc<RwLock<..>>`: the scanner holds the write lock for one directory at
//! a time, so a view can take brief read locks between steps and render the
//! incrementally-growing tree. The cooperative per-directory granularity of
//! the job is what keeps the lock hold times short.

use crate::events::{self, EngineEvent, EventReceiver, EventSender};
use crate::model::DirectoryTree;
use crate::scan::{auto_continue_mounts, ScanJob, ScanOptions};
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::info;

/// A concurrently-readable tree being populated by a background scan.
pub type LiveTree = Arc<RwLock<DirectoryTree>>;

/// Handle to a running or completed background scan.
pub struct ScanHandle {
    /// Engine events from the scan thread.
    pub events_rx: EventReceiver,
    /// Shared tree, populated incrementally while the scan runs.
    pub live_tree: LiveTree,
    /// Flag to request cancellation.
    cancel: Arc<AtomicBool>,
    /// Join handle for the scan thread.
    _thread: Option<thread::JoinHandle<()>>,
}

impl ScanHandle {
    /// Request the scan to stop at the next directory boundary.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Check whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }
}

/// Start a scan on a background thread.
///
/// Returns a handle for receiving events, reading the live tree, and
/// requesting cancellation.
pub fn start_scan(path: PathBuf, options: ScanOptions) -> ScanHandle {
    let (events_tx, events_rx) = events::channel();

    let mut tree = DirectoryTree::new(&path);
    let mut job = ScanJob::for_tree(&mut tree, options.clone());
    let cancel = job.cancel_flag();

    let live_tree: LiveTree = Arc::new(RwLock::new(tree));
    let tree_clone = live_tree.clone();

    let thread = thread::Builder::new()
        .name("spacescout-scanner".into())
        .spawn(move || {
            info!("starting background scan of {}", path.display());
            run_scan(&mut job, &tree_clone, &options, &events_tx, path);
        })
        .expect("failed to spawn scanner thread");

    ScanHandle {
        events_rx,
        live_tree,
        cancel,
        _thread: Some(thread),
    }
}

fn run_scan(
    job: &mut ScanJob,
    live_tree: &LiveTree,
    options: &ScanOptions,
    events_tx: &EventSender,
    path: PathBuf,
) {
    events::emit(events_tx, EngineEvent::ScanStarted { path });

    loop {
        // One directory per lock acquisition: readers interleave freely.
        let mut tree = live_tree.write();
        if job.step(&mut tree, events_tx) {
            break;
        }
    }

    if !job.was_cancelled() {
        let mut tree = live_tree.write();
        auto_continue_mounts(&mut tree, options, events_tx);
    }
}
