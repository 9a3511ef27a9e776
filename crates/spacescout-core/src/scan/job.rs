//! The cooperative depth-first walk.
//!
//! A `ScanJob` holds an explicit stack of directories still to read and
//! processes exactly one directory per [`step`](ScanJob::step) call, so the
//! thread driving it can interleave other work. Cancellation is advisory
//! and observed at directory boundaries only — an in-flight `read_dir`
//! completes.

use crate::error::ScanError;
use crate::events::{self, EngineEvent, EventSender};
use crate::model::{DirectoryTree, Node, NodeIndex, NodeKind, ReadState};
use crate::platform;
use crate::scan::ScanOptions;
use compact_str::CompactString;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Emit a progress event every this many directories.
const PROGRESS_EVERY: u64 = 16;

/// A directory queued for reading, together with the device its parent
/// sits on so mount crossings can be detected.
struct StackEntry {
    node: NodeIndex,
    dev: u64,
}

/// An in-progress walk over one subtree.
pub struct ScanJob {
    options: ScanOptions,
    scan_root: NodeIndex,
    stack: Vec<StackEntry>,
    cancel: Arc<AtomicBool>,
    cancelled: bool,
    done: bool,
    dirs_read: u64,
    entries_seen: u64,
    errors: u64,
    started: Instant,
}

impl ScanJob {
    /// Start a walk of the whole tree from its root. Any children the root
    /// already has are discarded first.
    pub fn for_tree(tree: &mut DirectoryTree, options: ScanOptions) -> Self {
        let root = tree.root;
        tree.clear_children(root);
        tree.node_mut(root).read_state = ReadState::NotRead;
        tree.node_mut(root).partial = false;

        let dev = fs::metadata(&tree.path)
            .map(|m| platform::device_id(&m))
            .unwrap_or(0);

        Self::with_target(root, dev, options)
    }

    /// Start a walk scoped to the subtree at `node` (refresh in place).
    pub fn for_subtree(
        tree: &mut DirectoryTree,
        node: NodeIndex,
        options: ScanOptions,
    ) -> Result<Self, ScanError> {
        if !tree.is_attached(node) {
            return Err(ScanError::Detached);
        }
        {
            let n = tree.node(node);
            if n.read_state == ReadState::Reading {
                return Err(ScanError::Busy);
            }
            if !matches!(n.kind, NodeKind::Directory | NodeKind::MountPoint) {
                return Err(ScanError::NotRefreshable(n.kind));
            }
        }

        tree.clear_children(node);
        tree.node_mut(node).read_state = ReadState::NotRead;
        tree.node_mut(node).partial = false;

        let dev = fs::metadata(tree.full_path(node))
            .map(|m| platform::device_id(&m))
            .unwrap_or(0);

        Ok(Self::with_target(node, dev, options))
    }

    fn with_target(node: NodeIndex, dev: u64, options: ScanOptions) -> Self {
        Self {
            options,
            scan_root: node,
            stack: vec![StackEntry { node, dev }],
            cancel: Arc::new(AtomicBool::new(false)),
            cancelled: false,
            done: false,
            dirs_read: 0,
            entries_seen: 0,
            errors: 0,
            started: Instant::now(),
        }
    }

    /// Shared flag that requests cancellation when set.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// `true` once the walk has finished (completed or cancelled).
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// `true` if the walk ended because cancellation was requested.
    pub fn was_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Recovered-error count so far.
    pub fn errors(&self) -> u64 {
        self.errors
    }

    /// Process one directory. Returns `true` once the walk is finished.
    ///
    /// Cancellation is observed here, at the directory boundary: the nodes
    /// still queued — the in-progress level's not-yet-visited directories —
    /// are marked Aborted and the tree is finalized over whatever was read.
    pub fn step(&mut self, tree: &mut DirectoryTree, events: &EventSender) -> bool {
        if self.done {
            return true;
        }

        if self.cancel.load(Ordering::Relaxed) {
            for entry in self.stack.drain(..) {
                tree.node_mut(entry.node).read_state = ReadState::Aborted;
            }
            self.finalize(tree, events, true);
            return true;
        }

        let Some(entry) = self.stack.pop() else {
            self.finalize(tree, events, false);
            return true;
        };

        let path = self.read_directory(tree, entry, events);
        self.dirs_read += 1;
        if self.dirs_read % PROGRESS_EVERY == 0 {
            events::emit(
                events,
                EngineEvent::ScanProgress {
                    dirs_read: self.dirs_read,
                    entries_seen: self.entries_seen,
                    current_path: path,
                },
            );
        }
        false
    }

    /// Drive the walk to completion on the current thread.
    pub fn run(&mut self, tree: &mut DirectoryTree, events: &EventSender) {
        while !self.step(tree, events) {}
    }

    /// Read one directory's entries and queue its sub-directories.
    fn read_directory(
        &mut self,
        tree: &mut DirectoryTree,
        entry: StackEntry,
        events: &EventSender,
    ) -> PathBuf {
        let StackEntry { node, dev } = entry;
        tree.node_mut(node).read_state = ReadState::Reading;
        let path = tree.full_path(node);

        let reader = match fs::read_dir(&path) {
            Ok(reader) => reader,
            Err(source) => {
                // The directory itself is unreadable: it becomes an
                // Excluded leaf and the walk continues with its siblings.
                self.errors += 1;
                let err = ScanError::DirRead {
                    path: path.clone(),
                    source,
                };
                warn!("{err}");
                events::emit(
                    events,
                    EngineEvent::ScanIssue {
                        path: path.clone(),
                        message: err.to_string(),
                    },
                );
                let n = tree.node_mut(node);
                n.kind = NodeKind::Excluded;
                n.read_state = ReadState::Finished;
                n.partial = true;
                return path;
            }
        };

        for entry_result in reader {
            let dir_entry = match entry_result {
                Ok(e) => e,
                Err(e) => {
                    self.errors += 1;
                    events::emit(
                        events,
                        EngineEvent::ScanIssue {
                            path: path.clone(),
                            message: e.to_string(),
                        },
                    );
                    continue;
                }
            };

            let entry_path = dir_entry.path();
            let name = CompactString::new(dir_entry.file_name().to_string_lossy().as_ref());

            // Never follow symlinks — a link is tallied by its own size.
            let meta = match fs::symlink_metadata(&entry_path) {
                Ok(meta) => meta,
                Err(_) => {
                    self.errors += 1;
                    let err = ScanError::Vanished(entry_path.clone());
                    warn!("{err}");
                    events::emit(
                        events,
                        EngineEvent::ScanIssue {
                            path: entry_path,
                            message: err.to_string(),
                        },
                    );
                    tree.add_child(node, Node::excluded(name, 0));
                    self.entries_seen += 1;
                    continue;
                }
            };

            if let Some(rules) = &self.options.exclude {
                if rules.is_match(&entry_path) {
                    debug!("excluded by rule: {}", entry_path.display());
                    tree.add_child(node, Node::excluded(name, 0));
                    self.entries_seen += 1;
                    continue;
                }
            }

            if meta.file_type().is_dir() {
                let child_dev = platform::device_id(&meta);
                let crosses_mount = dev != 0 && child_dev != 0 && child_dev != dev;

                if crosses_mount {
                    let mut child = Node::mount_point(name);
                    child.mtime = meta.modified().ok();
                    child.link_count = platform::link_count(&meta);
                    let idx = tree.add_child(node, child);
                    if self.options.cross_mount_points {
                        tree.node_mut(idx).read_state = ReadState::NotRead;
                        self.stack.push(StackEntry {
                            node: idx,
                            dev: child_dev,
                        });
                    }
                } else {
                    let mut child = Node::directory(name);
                    child.mtime = meta.modified().ok();
                    child.link_count = platform::link_count(&meta);
                    let idx = tree.add_child(node, child);
                    self.stack.push(StackEntry {
                        node: idx,
                        dev: if child_dev != 0 { child_dev } else { dev },
                    });
                }
            } else {
                let bucket = tree.ensure_dot_entry(node);
                let mut child = Node::file(name, meta.len());
                child.own_blocks = platform::block_count(&meta);
                child.mtime = meta.modified().ok();
                child.link_count = platform::link_count(&meta);
                tree.add_child(bucket, child);
            }
            self.entries_seen += 1;
        }

        path
    }

    /// Bottom-up completion pass: settle read states, compute aggregates,
    /// re-aggregate ancestors for subtree walks, and announce the result.
    fn finalize(&mut self, tree: &mut DirectoryTree, events: &EventSender, cancelled: bool) {
        tree.finalize_subtree(self.scan_root);
        if self.scan_root != tree.root {
            if let Some(parent) = tree.node(self.scan_root).parent {
                tree.reaggregate_upward(parent);
            }
        }
        tree.bump_generation();
        self.cancelled = cancelled;
        self.done = true;

        let duration = self.started.elapsed();
        info!(
            "scan of {} {}: {} dirs, {} entries, {} errors in {:?}",
            tree.full_path(self.scan_root).display(),
            if cancelled { "cancelled" } else { "finished" },
            self.dirs_read,
            self.entries_seen,
            self.errors,
            duration,
        );

        events::emit(
            events,
            EngineEvent::TreeChanged {
                generation: tree.generation,
                node: self.scan_root,
            },
        );
        events::emit(
            events,
            EngineEvent::LayoutInvalidated {
                generation: tree.generation,
            },
        );
        events::emit(
            events,
            EngineEvent::ScanFinished {
                cancelled,
                errors: self.errors,
                duration,
            },
        );
    }
}
