//! Arena-backed directory tree with bottom-up size aggregation.
//!
//! All nodes live in a single `Vec<Node>`. Relationships between nodes use
//! `NodeIndex` (a thin `u32` wrapper) rather than heap pointers. Structural
//! changes bump a generation counter that consumers (treemap layouts, cached
//! aggregates) use for invalidation. Detached subtrees stay in the arena but
//! become unreachable from the root; the arena is rebuilt by the next full
//! scan.

use super::node::{Node, NodeIndex, NodeKind, ReadState};
use compact_str::CompactString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Source of unique tree identities, used to match asynchronous completions
/// against the tree they were started on.
static NEXT_TREE_ID: AtomicU64 = AtomicU64::new(1);

/// The directory tree produced by one scan (or cache load).
#[derive(Debug, Clone)]
pub struct DirectoryTree {
    /// Arena: every node in a flat vector.
    pub nodes: Vec<Node>,

    /// The single root node.
    pub root: NodeIndex,

    /// The scan target this tree was built from.
    pub path: PathBuf,

    /// Bumped on every structural change. Derived data (layouts, cached
    /// aggregates) stamped with an older generation is stale.
    pub generation: u64,

    /// Unique identity of this tree instance.
    pub id: u64,

    /// Currently selected nodes, always attached to this tree.
    selection: Vec<NodeIndex>,
}

impl DirectoryTree {
    /// Create a tree containing only a root directory node for `path`.
    pub fn new(path: &Path) -> Self {
        let name = root_display_name(path);
        let root_node = Node::directory(CompactString::new(&name));
        Self {
            nodes: vec![root_node],
            root: NodeIndex::new(0),
            path: path.to_path_buf(),
            generation: 0,
            id: NEXT_TREE_ID.fetch_add(1, Ordering::Relaxed),
            selection: Vec::new(),
        }
    }

    /// Get the node at the given index.
    #[inline]
    pub fn node(&self, index: NodeIndex) -> &Node {
        &self.nodes[index.idx()]
    }

    /// Get a mutable reference to the node at the given index.
    #[inline]
    pub fn node_mut(&mut self, index: NodeIndex) -> &mut Node {
        &mut self.nodes[index.idx()]
    }

    /// Total number of arena slots (including detached nodes).
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if the tree contains no nodes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Record a structural change.
    #[inline]
    pub fn bump_generation(&mut self) {
        self.generation += 1;
    }

    /// Allocate `node` in the arena and append it as the last child of
    /// `parent`, preserving insertion order among siblings.
    pub fn add_child(&mut self, parent: NodeIndex, node: Node) -> NodeIndex {
        let idx = NodeIndex::new(self.nodes.len());
        self.nodes.push(node);
        self.nodes[idx.idx()].parent = Some(parent);

        match self.nodes[parent.idx()].first_child {
            None => self.nodes[parent.idx()].first_child = Some(idx),
            Some(first) => {
                let mut tail = first;
                while let Some(next) = self.nodes[tail.idx()].next_sibling {
                    tail = next;
                }
                self.nodes[tail.idx()].next_sibling = Some(idx);
            }
        }
        idx
    }

    /// Direct children of a node, in insertion order.
    pub fn children(&self, parent: NodeIndex) -> Vec<NodeIndex> {
        let mut children = Vec::new();
        let mut child = self.nodes[parent.idx()].first_child;
        while let Some(idx) = child {
            children.push(idx);
            child = self.nodes[idx.idx()].next_sibling;
        }
        children
    }

    /// Direct children sorted by descending `total_size`.
    pub fn children_sorted_by_size(&self, parent: NodeIndex) -> Vec<NodeIndex> {
        let mut children = self.children(parent);
        children.sort_unstable_by(|a, b| {
            self.nodes[b.idx()]
                .total_size
                .cmp(&self.nodes[a.idx()].total_size)
        });
        children
    }

    /// The `<Files>` bucket of a directory, if it has one.
    pub fn dot_entry(&self, parent: NodeIndex) -> Option<NodeIndex> {
        self.children(parent)
            .into_iter()
            .find(|&c| self.nodes[c.idx()].kind == NodeKind::DotEntry)
    }

    /// The `<Files>` bucket of a directory, created on first use.
    pub fn ensure_dot_entry(&mut self, parent: NodeIndex) -> NodeIndex {
        match self.dot_entry(parent) {
            Some(idx) => idx,
            None => self.add_child(parent, Node::dot_entry()),
        }
    }

    /// Reconstruct the full filesystem path of a node.
    ///
    /// Synthetic DotEntry segments are skipped: a file below a `<Files>`
    /// bucket resolves to `dir/file`, not `dir/<Files>/file`.
    pub fn full_path(&self, index: NodeIndex) -> PathBuf {
        let mut segments: Vec<&str> = Vec::new();
        let mut current = index;
        while current != self.root {
            let node = &self.nodes[current.idx()];
            if node.kind != NodeKind::DotEntry {
                segments.push(node.name.as_str());
            }
            match node.parent {
                Some(parent) => current = parent,
                None => break,
            }
        }
        let mut path = self.path.clone();
        for segment in segments.iter().rev() {
            path.push(segment);
        }
        path
    }

    /// `true` if walking the parent chain from `index` reaches the root.
    pub fn is_attached(&self, index: NodeIndex) -> bool {
        if index.idx() >= self.nodes.len() {
            return false;
        }
        let mut current = index;
        loop {
            if current == self.root {
                return true;
            }
            match self.nodes[current.idx()].parent {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    /// Unlink a node from its parent's child list. The subtree stays in the
    /// arena but is no longer reachable from the root. Returns `false` for
    /// the root or an already-detached node.
    pub fn detach(&mut self, index: NodeIndex) -> bool {
        if index == self.root {
            return false;
        }
        let Some(parent) = self.nodes[index.idx()].parent else {
            return false;
        };

        let mut cursor = self.nodes[parent.idx()].first_child;
        let mut previous: Option<NodeIndex> = None;
        while let Some(current) = cursor {
            if current == index {
                let next = self.nodes[current.idx()].next_sibling;
                match previous {
                    None => self.nodes[parent.idx()].first_child = next,
                    Some(prev) => self.nodes[prev.idx()].next_sibling = next,
                }
                self.nodes[index.idx()].parent = None;
                self.nodes[index.idx()].next_sibling = None;
                self.prune_selection();
                self.bump_generation();
                return true;
            }
            previous = Some(current);
            cursor = self.nodes[current.idx()].next_sibling;
        }
        false
    }

    /// Detach every child of `index`, leaving the node itself in place.
    /// Used when a subtree is about to be re-read from the filesystem.
    pub fn clear_children(&mut self, index: NodeIndex) {
        let mut child = self.nodes[index.idx()].first_child.take();
        while let Some(idx) = child {
            child = self.nodes[idx.idx()].next_sibling.take();
            self.nodes[idx.idx()].parent = None;
        }
        self.prune_selection();
        self.bump_generation();
    }

    /// Nodes of the subtree rooted at `index`, in pre-order.
    pub fn subtree(&self, index: NodeIndex) -> Vec<NodeIndex> {
        let mut order = Vec::new();
        let mut stack = vec![index];
        while let Some(current) = stack.pop() {
            order.push(current);
            let mut child = self.nodes[current.idx()].first_child;
            while let Some(idx) = child {
                stack.push(idx);
                child = self.nodes[idx.idx()].next_sibling;
            }
        }
        order
    }

    // ── Aggregation ─────────────────────────────────────────────────

    /// What a child contributes to its parent's aggregates:
    /// `(size, blocks, items)`. On-request-only mount points count as one
    /// visible item but contribute no bytes until explicitly continued.
    fn contribution(&self, child: NodeIndex) -> (u64, u64, u64) {
        let node = &self.nodes[child.idx()];
        let own_item = if node.kind == NodeKind::DotEntry { 0 } else { 1 };
        if node.read_state == ReadState::OnRequestOnly {
            return (0, 0, own_item);
        }
        (
            node.total_size,
            node.total_blocks,
            node.total_item_count + own_item,
        )
    }

    /// Recompute one dir-like node's aggregates from its direct children.
    /// Children's own aggregates must already be valid.
    pub fn recompute_from_children(&mut self, index: NodeIndex) {
        if !self.nodes[index.idx()].is_dir_like() {
            return;
        }
        let mut size = 0u64;
        let mut blocks = 0u64;
        let mut items = 0u64;
        let mut partial = false;

        for child in self.children(index) {
            let (s, b, i) = self.contribution(child);
            size += s;
            blocks += b;
            items += i;
            let child_node = &self.nodes[child.idx()];
            partial |= child_node.partial || child_node.read_state == ReadState::Aborted;
        }

        let node = &mut self.nodes[index.idx()];
        node.total_size = size;
        node.total_blocks = blocks;
        node.total_item_count = items;
        node.partial = partial || node.read_state == ReadState::Aborted;
    }

    /// Recompute aggregates for `from` (if dir-like) and every ancestor up
    /// to the root. Descendant aggregates outside this chain are untouched.
    pub fn reaggregate_upward(&mut self, from: NodeIndex) {
        let mut current = Some(from);
        while let Some(index) = current {
            self.recompute_from_children(index);
            current = self.nodes[index.idx()].parent;
        }
    }

    /// Bottom-up finalization pass over the subtree rooted at `index`:
    /// leaves get their own totals, dir-like nodes sum their children, and
    /// read states settle — a read directory becomes Finished unless it was
    /// never read or any child aborted, in which case it becomes Aborted.
    /// On-request-only mount points are left as they are.
    pub fn finalize_subtree(&mut self, index: NodeIndex) {
        let order = self.subtree(index);
        for &idx in order.iter().rev() {
            let kind = self.nodes[idx.idx()].kind;
            match kind {
                NodeKind::File | NodeKind::Excluded => {
                    let node = &mut self.nodes[idx.idx()];
                    node.total_size = node.own_size;
                    node.total_blocks = node.own_blocks;
                    node.total_item_count = 0;
                    node.read_state = ReadState::Finished;
                }
                NodeKind::DotEntry => {
                    self.recompute_from_children(idx);
                    self.nodes[idx.idx()].read_state = ReadState::Finished;
                }
                NodeKind::Directory | NodeKind::MountPoint => {
                    let state = self.nodes[idx.idx()].read_state;
                    if state == ReadState::OnRequestOnly {
                        continue;
                    }
                    let never_read = !matches!(
                        state,
                        ReadState::Reading | ReadState::Finished | ReadState::Aborted
                    );
                    let any_child_aborted = self
                        .children(idx)
                        .iter()
                        .any(|&c| self.nodes[c.idx()].read_state == ReadState::Aborted);

                    self.nodes[idx.idx()].read_state =
                        if never_read || any_child_aborted || state == ReadState::Aborted {
                            ReadState::Aborted
                        } else {
                            ReadState::Finished
                        };
                    self.recompute_from_children(idx);
                }
            }
        }
    }

    // ── Selection ───────────────────────────────────────────────────

    /// The current selection.
    pub fn selection(&self) -> &[NodeIndex] {
        &self.selection
    }

    /// Replace the selection. Nodes not attached to this tree are dropped.
    pub fn set_selection(&mut self, nodes: Vec<NodeIndex>) {
        self.selection = nodes;
        self.prune_selection();
    }

    fn prune_selection(&mut self) {
        // Walking the parent chain needs `&self`; collect first.
        let keep: Vec<NodeIndex> = self
            .selection
            .iter()
            .copied()
            .filter(|&idx| self.is_attached(idx))
            .collect();
        self.selection = keep;
    }
}

/// Derive a display name for the scan root.
fn root_display_name(path: &Path) -> String {
    match path.file_name() {
        Some(name) => name.to_string_lossy().into_owned(),
        None => path.to_string_lossy().into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    /// Build the tree from the aggregation scenario by hand:
    /// root/a/file1 (100 bytes) and root/a/b/file2 (200 bytes).
    fn scenario_tree() -> (DirectoryTree, NodeIndex, NodeIndex, NodeIndex) {
        let mut tree = DirectoryTree::new(Path::new("/scan"));
        let a = tree.add_child(tree.root, Node::directory("a".into()));
        let a_dot = tree.ensure_dot_entry(a);
        tree.add_child(a_dot, Node::file("file1".into(), 100));
        let b = tree.add_child(a, Node::directory("b".into()));
        let b_dot = tree.ensure_dot_entry(b);
        tree.add_child(b_dot, Node::file("file2".into(), 200));

        for idx in [a, b] {
            tree.node_mut(idx).read_state = ReadState::Reading;
        }
        tree.node_mut(tree.root).read_state = ReadState::Reading;
        tree.finalize_subtree(tree.root);
        (tree, a, a_dot, b)
    }

    #[test]
    fn aggregation_sums_children() {
        let (tree, a, a_dot, b) = scenario_tree();
        assert_eq!(tree.node(a).total_size, 300);
        assert_eq!(tree.node(a_dot).total_size, 100);
        assert_eq!(tree.node(b).total_size, 200);
        assert_eq!(tree.node(tree.root).total_size, 300);
        // file1 + file2 + dir b; DotEntry buckets are not items.
        assert_eq!(tree.node(a).total_item_count, 3);
        assert_eq!(tree.node(tree.root).read_state, ReadState::Finished);
        assert!(!tree.node(tree.root).partial);
    }

    #[test]
    fn full_path_skips_dot_entries() {
        let (tree, a, a_dot, _) = scenario_tree();
        let file1 = tree.children(a_dot)[0];
        assert_eq!(tree.full_path(file1), Path::new("/scan/a/file1"));
        assert_eq!(tree.full_path(a), Path::new("/scan/a"));
        assert_eq!(tree.full_path(tree.root), Path::new("/scan"));
    }

    #[test]
    fn children_keep_insertion_order() {
        let mut tree = DirectoryTree::new(Path::new("/scan"));
        let first = tree.add_child(tree.root, Node::directory("first".into()));
        let second = tree.add_child(tree.root, Node::directory("second".into()));
        let third = tree.add_child(tree.root, Node::directory("third".into()));
        assert_eq!(tree.children(tree.root), vec![first, second, third]);
    }

    #[test]
    fn detach_removes_subtree_and_reaggregates() {
        let (mut tree, a, _, b) = scenario_tree();
        let before = tree.node(tree.root).total_size;
        let b_size = tree.node(b).total_size;
        let generation = tree.generation;

        assert!(tree.detach(b));
        tree.reaggregate_upward(a);

        assert!(!tree.is_attached(b));
        assert_eq!(tree.node(tree.root).total_size, before - b_size);
        assert_eq!(tree.node(a).total_size, 100);
        assert!(tree.generation > generation);
    }

    #[test]
    fn detach_root_is_refused() {
        let (mut tree, ..) = scenario_tree();
        let root = tree.root;
        assert!(!tree.detach(root));
    }

    #[test]
    fn selection_dropped_on_detach() {
        let (mut tree, _, _, b) = scenario_tree();
        tree.set_selection(vec![b]);
        assert_eq!(tree.selection(), &[b]);
        tree.detach(b);
        assert!(tree.selection().is_empty());
    }

    #[test]
    fn on_request_mount_contributes_zero() {
        let mut tree = DirectoryTree::new(Path::new("/scan"));
        let dot = tree.ensure_dot_entry(tree.root);
        tree.add_child(dot, Node::file("data".into(), 500));
        let mnt = tree.add_child(tree.root, Node::mount_point("mnt".into()));

        tree.node_mut(tree.root).read_state = ReadState::Reading;
        tree.finalize_subtree(tree.root);

        assert_eq!(tree.node(tree.root).total_size, 500);
        // The mount point is still a visible item.
        assert_eq!(tree.node(tree.root).total_item_count, 2);
        assert_eq!(tree.node(mnt).read_state, ReadState::OnRequestOnly);
        assert!(!tree.node(tree.root).partial);
    }

    #[test]
    fn excluded_child_flags_ancestors_partial() {
        let mut tree = DirectoryTree::new(Path::new("/scan"));
        let a = tree.add_child(tree.root, Node::directory("a".into()));
        tree.add_child(a, Node::excluded("secret".into(), 0));
        tree.node_mut(a).read_state = ReadState::Reading;
        tree.node_mut(tree.root).read_state = ReadState::Reading;
        tree.finalize_subtree(tree.root);

        assert!(tree.node(a).partial);
        assert!(tree.node(tree.root).partial);
        assert_eq!(tree.node(a).read_state, ReadState::Finished);
    }
}
