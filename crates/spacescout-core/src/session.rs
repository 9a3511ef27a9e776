//! Session context — the single logical owner of one tree and everything
//! derived from it.
//!
//! One `Session` owns the directory tree, the cleanup collection, the
//! activity tracker, and the treemap view, and is driven by exactly one
//! thread. Scans run cooperatively inside [`pump`](Session::pump), and
//! cleanup completions — produced on worker threads — are drained there
//! too, so tree mutation from a completion never races a scan. If a
//! refresh and a cleanup-triggered update target overlapping subtrees, the
//! later completion wins: an outcome whose node no longer exists (or whose
//! tree was replaced) is discarded.

use crate::activity::{ActivityTracker, FeedbackPrefs};
use crate::cleanup::{exec, CleanupCollection, CleanupOutcome, OutcomeReceiver, OutcomeSender, RefreshPolicy};
use crate::error::{CacheError, CleanupError, ScanError};
use crate::events::{self, EngineEvent, EventReceiver, EventSender};
use crate::model::{DirectoryTree, NodeIndex, NodeKind};
use crate::scan::{self, ScanJob, ScanOptions};
use crate::treemap::{Rect, Tile, TreemapView};
use crate::cache;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Activity weight of a selection change.
pub const WEIGHT_SELECTION: u32 = 3;

/// Activity weight of a treemap zoom.
pub const WEIGHT_ZOOM: u32 = 2;

/// Activity weight of one successfully completed cleanup invocation.
pub const WEIGHT_CLEANUP: u32 = 120;

/// Directories stepped per [`pump`](Session::pump) call while a scan is
/// active. Small enough to keep a host event loop responsive.
const SCAN_BUDGET_PER_PUMP: usize = 64;

/// Session-scoped engine context.
pub struct Session {
    options: ScanOptions,
    tree: Option<DirectoryTree>,
    cleanups: CleanupCollection,
    tracker: ActivityTracker,
    treemap: Option<TreemapView>,
    scan_job: Option<ScanJob>,
    scan_cancel: Option<Arc<AtomicBool>>,
    in_flight: usize,
    events_tx: EventSender,
    events_rx: EventReceiver,
    outcome_tx: OutcomeSender,
    outcome_rx: OutcomeReceiver,
}

impl Session {
    /// Create a session with the standard cleanups and default feedback
    /// preferences.
    pub fn new(options: ScanOptions) -> Self {
        Self::with_config(options, CleanupCollection::standard(), FeedbackPrefs::default())
    }

    /// Create a session with explicit configuration — the persisted
    /// cleanup collection and feedback flags are injected, never looked up
    /// globally.
    pub fn with_config(
        options: ScanOptions,
        cleanups: CleanupCollection,
        prefs: FeedbackPrefs,
    ) -> Self {
        let (events_tx, events_rx) = events::channel();
        // Completions must never be dropped, so this channel is unbounded;
        // it holds at most the number of in-flight invocations.
        let (outcome_tx, outcome_rx) = crossbeam_channel::unbounded();
        Self {
            options,
            tree: None,
            cleanups,
            tracker: ActivityTracker::new(prefs),
            treemap: None,
            scan_job: None,
            scan_cancel: None,
            in_flight: 0,
            events_tx,
            events_rx,
            outcome_tx,
            outcome_rx,
        }
    }

    /// A receiver for engine events. May be called any number of times;
    /// receivers share one stream.
    pub fn subscribe(&self) -> EventReceiver {
        self.events_rx.clone()
    }

    /// The current tree, if any scan or cache load completed (or is in
    /// progress).
    pub fn tree(&self) -> Option<&DirectoryTree> {
        self.tree.as_ref()
    }

    pub fn cleanups(&self) -> &CleanupCollection {
        &self.cleanups
    }

    pub fn cleanups_mut(&mut self) -> &mut CleanupCollection {
        &mut self.cleanups
    }

    pub fn tracker(&self) -> &ActivityTracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut ActivityTracker {
        &mut self.tracker
    }

    // ── Scanning ────────────────────────────────────────────────────

    /// Start a cooperative scan of `path`, replacing any current tree.
    /// Drive it with [`pump`](Session::pump).
    pub fn begin_scan(&mut self, path: &Path) {
        let mut tree = DirectoryTree::new(path);
        let job = ScanJob::for_tree(&mut tree, self.options.clone());
        self.scan_cancel = Some(job.cancel_flag());
        self.scan_job = Some(job);
        self.tree = Some(tree);
        self.treemap = None;
        events::emit(
            &self.events_tx,
            EngineEvent::ScanStarted {
                path: path.to_path_buf(),
            },
        );
    }

    /// Scan `path` to completion synchronously.
    pub fn scan(&mut self, path: &Path) {
        self.begin_scan(path);
        while self.scan_job.is_some() {
            self.pump();
        }
    }

    /// `true` while a cooperative scan is in progress.
    pub fn scanning(&self) -> bool {
        self.scan_job.is_some()
    }

    /// Request cancellation of the active scan; observed at the next
    /// directory boundary.
    pub fn cancel_scan(&self) {
        if let Some(flag) = &self.scan_cancel {
            flag.store(true, Ordering::Relaxed);
        }
    }

    /// Do one slice of pending work: step the active scan (a bounded
    /// number of directories) and drain cleanup completions, applying
    /// their refresh policies. Returns `true` while more work is pending.
    pub fn pump(&mut self) -> bool {
        if let Some(mut job) = self.scan_job.take() {
            if let Some(tree) = self.tree.as_mut() {
                let mut finished = false;
                for _ in 0..SCAN_BUDGET_PER_PUMP {
                    if job.step(tree, &self.events_tx) {
                        finished = true;
                        break;
                    }
                }
                if finished {
                    if !job.was_cancelled() {
                        scan::auto_continue_mounts(tree, &self.options, &self.events_tx);
                    }
                    self.scan_cancel = None;
                } else {
                    self.scan_job = Some(job);
                }
            }
        }

        while let Ok(outcome) = self.outcome_rx.try_recv() {
            self.in_flight = self.in_flight.saturating_sub(1);
            self.apply_outcome(outcome);
        }

        self.scan_job.is_some() || self.in_flight > 0
    }

    /// Cleanup invocations whose completion has not arrived yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Re-read the subtree at `node` in place and re-aggregate its
    /// ancestors.
    pub fn refresh_subtree(&mut self, node: NodeIndex) -> Result<(), ScanError> {
        if self.scan_job.is_some() {
            return Err(ScanError::Busy);
        }
        let tree = self.tree.as_mut().ok_or(ScanError::Detached)?;
        scan::refresh_subtree(tree, node, &self.options, &self.events_tx)
    }

    /// Continue reading at an on-request-only mount point.
    pub fn continue_at_mount_point(&mut self, node: NodeIndex) -> Result<(), ScanError> {
        if self.scan_job.is_some() {
            return Err(ScanError::Busy);
        }
        let tree = self.tree.as_mut().ok_or(ScanError::Detached)?;
        scan::continue_at_mount_point(tree, node, &self.options, &self.events_tx)
    }

    // ── Cache ───────────────────────────────────────────────────────

    /// Replace the current tree with one loaded from a cache snapshot.
    /// Returns the number of records that had to be skipped.
    pub fn load_cache(&mut self, path: &Path) -> Result<u32, CacheError> {
        let (tree, warnings) = cache::read_cache_file(path)?;
        events::emit(
            &self.events_tx,
            EngineEvent::TreeChanged {
                generation: tree.generation,
                node: tree.root,
            },
        );
        events::emit(
            &self.events_tx,
            EngineEvent::LayoutInvalidated {
                generation: tree.generation,
            },
        );
        self.tree = Some(tree);
        self.treemap = None;
        Ok(warnings)
    }

    /// Write the current tree to a cache snapshot.
    pub fn save_cache(&self, path: &Path) -> Result<(), CacheError> {
        let tree = self.tree.as_ref().ok_or(CacheError::NoRoot)?;
        cache::write_cache_file(tree, path)?;
        Ok(())
    }

    // ── Selection ───────────────────────────────────────────────────

    /// Replace the selection. Unattached nodes are dropped.
    pub fn select(&mut self, nodes: Vec<NodeIndex>) {
        let Some(tree) = self.tree.as_mut() else {
            return;
        };
        tree.set_selection(nodes);
        let selection = tree.selection().to_vec();
        events::emit(&self.events_tx, EngineEvent::SelectionChanged { selection });
        self.track(WEIGHT_SELECTION);
    }

    /// The current selection (empty without a tree).
    pub fn selection(&self) -> &[NodeIndex] {
        self.tree.as_ref().map_or(&[], |t| t.selection())
    }

    // ── Cleanups ────────────────────────────────────────────────────

    /// Whether the cleanup with `id` is enabled for the current selection.
    pub fn cleanup_enabled(&self, id: &str) -> bool {
        self.tree
            .as_ref()
            .is_some_and(|tree| self.cleanups.is_enabled(id, tree, tree.selection()))
    }

    /// Execute the cleanup with `id` against the current selection,
    /// asynchronously. Outcomes are applied by [`pump`](Session::pump).
    /// Returns the number of invocations queued.
    pub fn execute_cleanup(&mut self, id: &str) -> Result<usize, CleanupError> {
        let tree = self
            .tree
            .as_ref()
            .ok_or_else(|| CleanupError::NotEnabled(id.to_string()))?;
        let cleanup = self
            .cleanups
            .get(id)
            .ok_or_else(|| CleanupError::UnknownId(id.to_string()))?
            .clone();
        if !cleanup.is_enabled(tree, tree.selection()) {
            return Err(CleanupError::NotEnabled(id.to_string()));
        }
        let selection = tree.selection().to_vec();
        let count = exec::execute(tree, &cleanup, &selection, &self.outcome_tx);
        self.in_flight += count;
        Ok(count)
    }

    /// Apply one completion on the owner thread.
    fn apply_outcome(&mut self, outcome: CleanupOutcome) {
        events::emit(
            &self.events_tx,
            EngineEvent::CleanupFinished {
                cleanup_id: outcome.cleanup_id.clone(),
                path: outcome.path.clone(),
                error: outcome.result.as_ref().err().map(|e| e.to_string()),
            },
        );

        let succeeded = outcome.result.is_ok();
        if succeeded {
            self.track(WEIGHT_CLEANUP);
        }

        let Some(tree) = self.tree.as_mut() else {
            return;
        };
        // Stale completion: the tree was replaced, or the node was already
        // removed by an overlapping operation. The later writer won.
        if outcome.tree_id != tree.id || !tree.is_attached(outcome.node) {
            return;
        }
        if !succeeded {
            return;
        }

        match outcome.refresh_policy {
            RefreshPolicy::None => {}
            RefreshPolicy::RefreshThisSubtree => {
                if let Some(target) = nearest_refreshable(tree, outcome.node) {
                    let _ = scan::refresh_subtree(tree, target, &self.options, &self.events_tx);
                }
            }
            RefreshPolicy::AssumeDeleted => {
                let parent = tree.node(outcome.node).parent;
                if tree.detach(outcome.node) {
                    if let Some(p) = parent {
                        tree.reaggregate_upward(p);
                    }
                    let generation = tree.generation;
                    let node = parent.unwrap_or(tree.root);
                    events::emit(
                        &self.events_tx,
                        EngineEvent::TreeChanged { generation, node },
                    );
                    events::emit(
                        &self.events_tx,
                        EngineEvent::LayoutInvalidated { generation },
                    );
                }
            }
        }
    }

    // ── Treemap ─────────────────────────────────────────────────────

    /// Lay out the treemap within `bounds`, rooted at `root` (or at the
    /// current zoom target when `None`). Returns the tile tree.
    pub fn layout(&mut self, root: Option<NodeIndex>, bounds: Rect) -> Option<&Tile> {
        let tree = self.tree.as_ref()?;
        let desired = match (root, self.treemap.as_ref()) {
            (Some(r), _) => r,
            (None, Some(view)) => view.root(),
            (None, None) => tree.root,
        };

        let rebuild = self.treemap.as_ref().map_or(true, |v| v.root() != desired);
        if rebuild {
            self.treemap = Some(TreemapView::new(tree, desired, bounds));
        } else if let Some(view) = self.treemap.as_mut() {
            if view.bounds() != bounds {
                view.set_bounds(tree, bounds);
            } else {
                view.ensure_current(tree);
            }
        }
        self.treemap.as_ref().and_then(|v| v.tile())
    }

    /// Zoom the treemap into `node`.
    pub fn zoom_in(&mut self, node: NodeIndex) -> bool {
        let zoomed = match (&self.tree, self.treemap.as_mut()) {
            (Some(tree), Some(view)) => view.zoom_in(tree, node),
            _ => false,
        };
        if zoomed {
            self.track(WEIGHT_ZOOM);
        }
        zoomed
    }

    /// Zoom the treemap back out to the previous root.
    pub fn zoom_out(&mut self) -> bool {
        let zoomed = match (&self.tree, self.treemap.as_mut()) {
            (Some(tree), Some(view)) => view.zoom_out(tree),
            _ => false,
        };
        if zoomed {
            self.track(WEIGHT_ZOOM);
        }
        zoomed
    }

    /// The deepest tile under the point, if a layout exists.
    pub fn hit_test(&self, x: f32, y: f32) -> Option<&Tile> {
        self.treemap.as_ref().and_then(|v| v.hit_test(x, y))
    }

    // ── Activity ────────────────────────────────────────────────────

    /// Feed an externally weighted activity event into the tracker.
    pub fn track_activity(&mut self, weight: u32) {
        self.track(weight);
    }

    fn track(&mut self, weight: u32) {
        if let Some(fired) = self.tracker.track_activity(weight) {
            events::emit(
                &self.events_tx,
                EngineEvent::ThresholdReached {
                    score: fired.score,
                    threshold: fired.threshold,
                },
            );
        }
    }
}

/// The node itself if it can be re-scanned, otherwise its nearest
/// refreshable ancestor — for a file that means the directory holding it.
fn nearest_refreshable(tree: &DirectoryTree, node: NodeIndex) -> Option<NodeIndex> {
    let mut current = Some(node);
    while let Some(idx) = current {
        if matches!(
            tree.node(idx).kind,
            NodeKind::Directory | NodeKind::MountPoint
        ) {
            return Some(idx);
        }
        current = tree.node(idx).parent;
    }
    None
}
