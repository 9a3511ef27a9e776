//! Scan engine — builds and refreshes directory trees from the filesystem.
//!
//! The walk itself is cooperative: a [`ScanJob`] processes one directory per
//! step so a host event loop stays responsive, and cancellation is checked
//! at each directory boundary. [`scan`] runs a job to completion
//! synchronously; [`background::start_scan`] steps one on a worker thread
//! against a shared live tree so a view can render results while the walk
//! is still running.
//!
//! Partial failure is the normal case, not an error: unreadable entries
//! become Excluded leaves, a cancelled walk leaves Aborted nodes, and
//! aggregates always cover whatever was actually read.

pub mod background;
pub mod job;

pub use background::{start_scan, ScanHandle};
pub use job::ScanJob;

use crate::error::ScanError;
use crate::events::{self, EngineEvent, EventSender};
use crate::model::{DirectoryTree, NodeIndex, NodeKind, ReadState};
use globset::GlobSet;
use std::path::Path;

/// Policy knobs for a walk.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Enter mount points inline during the walk instead of leaving them
    /// on-request-only. They are still marked as mount points.
    pub cross_mount_points: bool,

    /// Entries whose full path matches become Excluded leaves and are not
    /// descended into.
    pub exclude: Option<GlobSet>,

    /// After the main walk, immediately continue reading at every mount
    /// point that was left on-request-only (nested scans, one per mount).
    pub auto_continue_at_mount: bool,
}

/// Scan `path` synchronously and return the finished tree.
///
/// Never fails outright: an unreadable root yields a tree whose root is an
/// Excluded leaf.
pub fn scan(path: &Path, options: &ScanOptions) -> DirectoryTree {
    let (tx, _rx) = events::channel();
    scan_with_events(path, options, &tx)
}

/// Like [`scan`], but reporting progress over `events`.
pub fn scan_with_events(path: &Path, options: &ScanOptions, events: &EventSender) -> DirectoryTree {
    events::emit(
        events,
        EngineEvent::ScanStarted {
            path: path.to_path_buf(),
        },
    );
    let mut tree = DirectoryTree::new(path);
    let mut job = ScanJob::for_tree(&mut tree, options.clone());
    job.run(&mut tree, events);
    if !job.was_cancelled() {
        auto_continue_mounts(&mut tree, options, events);
    }
    tree
}

/// Re-read the subtree rooted at `node` in place.
///
/// The node's current subtree is discarded, the filesystem is walked again
/// below it, and every strict ancestor up to the root is re-aggregated.
/// Ancestors not on that path are untouched.
pub fn refresh_subtree(
    tree: &mut DirectoryTree,
    node: NodeIndex,
    options: &ScanOptions,
    events: &EventSender,
) -> Result<(), ScanError> {
    let mut job = ScanJob::for_subtree(tree, node, options.clone())?;
    events::emit(
        events,
        EngineEvent::ScanStarted {
            path: tree.full_path(node),
        },
    );
    job.run(tree, events);
    Ok(())
}

/// Continue reading at a mount point that was left on-request-only.
///
/// Runs a nested scan that replaces that single node's subtree and
/// re-aggregates its ancestors. The node keeps its MountPoint kind.
pub fn continue_at_mount_point(
    tree: &mut DirectoryTree,
    node: NodeIndex,
    options: &ScanOptions,
    events: &EventSender,
) -> Result<(), ScanError> {
    {
        let n = tree.node(node);
        if n.kind != NodeKind::MountPoint {
            return Err(ScanError::NotRefreshable(n.kind));
        }
        if n.read_state != ReadState::OnRequestOnly {
            return Err(ScanError::AlreadyContinued);
        }
    }
    refresh_subtree(tree, node, options, events)
}

/// Continue reading at every on-request-only mount point in the tree, if
/// the options ask for it. Each continuation is a nested scan; newly
/// discovered nested mounts are picked up too, so this terminates once no
/// on-request-only mount remains.
pub(crate) fn auto_continue_mounts(
    tree: &mut DirectoryTree,
    options: &ScanOptions,
    events: &EventSender,
) {
    if !options.auto_continue_at_mount {
        return;
    }
    loop {
        let next = tree.subtree(tree.root).into_iter().find(|&idx| {
            let n = tree.node(idx);
            n.kind == NodeKind::MountPoint && n.read_state == ReadState::OnRequestOnly
        });
        let Some(mount) = next else { break };
        if continue_at_mount_point(tree, mount, options, events).is_err() {
            break;
        }
    }
}
