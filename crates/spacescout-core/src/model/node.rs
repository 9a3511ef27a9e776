//! A single node in the arena-allocated directory tree.
//!
//! Nodes are stored in a flat `Vec<Node>` for cache-friendly traversal.
//! Parent-child relationships use indices rather than pointers, so ownership
//! stays acyclic: the parent link is a non-owning back-reference used for
//! upward aggregation and path reconstruction.

use compact_str::CompactString;
use std::time::SystemTime;

/// Display name of the synthetic bucket that collects a directory's
/// non-directory children.
pub const DOT_ENTRY_NAME: &str = "<Files>";

/// Lightweight index into the arena `Vec<Node>`.
///
/// Uses `u32` to keep nodes small — supports up to ~4 billion nodes,
/// which is more than enough for any real filesystem.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIndex(pub u32);

impl NodeIndex {
    /// Create a new `NodeIndex` from a `usize`, panicking if it exceeds `u32::MAX`.
    #[inline]
    pub fn new(index: usize) -> Self {
        debug_assert!(index <= u32::MAX as usize, "NodeIndex overflow");
        Self(index as u32)
    }

    /// Return the index as a `usize` for Vec indexing.
    #[inline]
    pub fn idx(self) -> usize {
        self.0 as usize
    }
}

/// What a node represents on (or beside) the filesystem.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// A regular file, symlink, or other non-directory entry.
    File,
    /// A real directory.
    Directory,
    /// Synthetic bucket holding a directory's direct non-directory children,
    /// so a directory's visible children are its sub-directories plus one
    /// `DotEntry`.
    DotEntry,
    /// A directory on a different filesystem than its parent.
    MountPoint,
    /// An entry that was not scanned — unreadable, vanished mid-scan, or
    /// matched by an exclude rule. Kept in the tree so the gap is visible.
    Excluded,
}

impl NodeKind {
    /// `true` for kinds that derive their size from children rather than
    /// carrying bytes of their own.
    #[inline]
    pub fn is_dir_like(self) -> bool {
        matches!(
            self,
            NodeKind::Directory | NodeKind::DotEntry | NodeKind::MountPoint
        )
    }
}

/// How far reading of a node has progressed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadState {
    /// Queued but not visited yet.
    NotRead,
    /// Currently being read — the node must not be mutated by anyone else.
    Reading,
    /// Fully read; aggregates are exact.
    Finished,
    /// Reading stopped early; aggregates cover whatever was read.
    Aborted,
    /// A mount point that is only read on explicit request.
    OnRequestOnly,
}

/// One filesystem entry (or synthetic aggregator) in the tree.
///
/// Stored in a flat arena (`Vec<Node>`). Children form a singly-linked list
/// via [`first_child`](Node::first_child) / [`next_sibling`](Node::next_sibling)
/// in insertion order, so no per-node child `Vec` allocation is needed.
#[derive(Debug, Clone)]
pub struct Node {
    /// Entry name only (NOT the full path). Full paths are reconstructed
    /// on demand by walking up via `parent`.
    pub name: CompactString,

    /// What this node represents.
    pub kind: NodeKind,

    /// Bytes belonging to the entry itself. Always 0 for Directory,
    /// DotEntry, and MountPoint nodes, which derive size from children.
    pub own_size: u64,

    /// 512-byte blocks allocated for the entry itself.
    pub own_blocks: u64,

    /// Sum of sizes over the subtree rooted here. Valid only once the
    /// subtree's read state is Finished or Aborted.
    pub total_size: u64,

    /// Sum of allocated 512-byte blocks over the subtree.
    pub total_blocks: u64,

    /// Number of real filesystem entries in the subtree, excluding this
    /// node itself and synthetic DotEntry buckets.
    pub total_item_count: u64,

    /// Last-modified timestamp, if known.
    pub mtime: Option<SystemTime>,

    /// Hard-link count of the entry.
    pub link_count: u32,

    /// Reading progress for this node.
    pub read_state: ReadState,

    /// `true` when the aggregate is best-available rather than exact —
    /// some descendant is Excluded or Aborted.
    pub partial: bool,

    /// Index of the parent node. `None` for the root and for detached nodes.
    pub parent: Option<NodeIndex>,

    /// First child in insertion order.
    pub first_child: Option<NodeIndex>,

    /// Next sibling under the same parent.
    pub next_sibling: Option<NodeIndex>,
}

impl Node {
    fn base(name: CompactString, kind: NodeKind, read_state: ReadState) -> Self {
        Self {
            name,
            kind,
            own_size: 0,
            own_blocks: 0,
            total_size: 0,
            total_blocks: 0,
            total_item_count: 0,
            mtime: None,
            link_count: 1,
            read_state,
            partial: false,
            parent: None,
            first_child: None,
            next_sibling: None,
        }
    }

    /// Create a regular file (or other non-directory) node.
    pub fn file(name: CompactString, size: u64) -> Self {
        let mut node = Self::base(name, NodeKind::File, ReadState::Finished);
        node.own_size = size;
        node.own_blocks = size.div_ceil(512);
        node
    }

    /// Create a directory node, queued for reading.
    pub fn directory(name: CompactString) -> Self {
        Self::base(name, NodeKind::Directory, ReadState::NotRead)
    }

    /// Create the synthetic `<Files>` bucket for a directory.
    pub fn dot_entry() -> Self {
        Self::base(
            CompactString::new(DOT_ENTRY_NAME),
            NodeKind::DotEntry,
            ReadState::Finished,
        )
    }

    /// Create a mount point node. Read on request only until a caller
    /// explicitly continues there.
    pub fn mount_point(name: CompactString) -> Self {
        Self::base(name, NodeKind::MountPoint, ReadState::OnRequestOnly)
    }

    /// Create an excluded leaf carrying the last known size (0 if unknown).
    pub fn excluded(name: CompactString, size: u64) -> Self {
        let mut node = Self::base(name, NodeKind::Excluded, ReadState::Finished);
        node.own_size = size;
        node.partial = true;
        node
    }

    /// `true` if this node derives its size from children.
    #[inline]
    pub fn is_dir_like(&self) -> bool {
        self.kind.is_dir_like()
    }
}
