//! Treemap engine — squarified proportional-rectangle layout.
//!
//! Pure geometry over a directory tree: no rendering, no UI types. The
//! layout partitions a rectangle among a node's children in descending
//! size order, grouping children into rows/columns (orientation alternating
//! with the aspect ratio of the remaining space) chosen to keep tile aspect
//! ratios close to square (Bruls, Huizing, van Wijk). Children with zero
//! total size are omitted — zero-area tiles only complicate hit-testing.
//!
//! Tiles are rebuilt whenever the underlying tree's generation changes or
//! the zoom target changes, never patched incrementally.

use crate::model::{DirectoryTree, NodeIndex};

/// Skip recursing into tiles smaller than this many square layout units —
/// nothing useful can be shown or hit-tested inside them.
const MIN_TILE_AREA: f32 = 0.25;

/// An axis-aligned rectangle in layout units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    #[inline]
    pub fn area(&self) -> f32 {
        self.w * self.h
    }

    /// Point containment, inclusive of the left/top edge.
    #[inline]
    pub fn contains(&self, px: f32, py: f32) -> bool {
        px >= self.x && px < self.x + self.w && py >= self.y && py < self.y + self.h
    }
}

/// One laid-out rectangle. Tiles form a tree isomorphic to the visualized
/// subtree (minus zero-size children), rooted at the current zoom target.
#[derive(Debug, Clone)]
pub struct Tile {
    pub node: NodeIndex,
    pub rect: Rect,
    pub depth: u16,
    pub children: Vec<Tile>,
}

/// Compute the tile tree for the subtree rooted at `node` within `bounds`.
pub fn layout(tree: &DirectoryTree, node: NodeIndex, bounds: Rect) -> Tile {
    let mut root = Tile {
        node,
        rect: bounds,
        depth: 0,
        children: Vec::new(),
    };
    build_children(tree, &mut root);
    root
}

fn build_children(tree: &DirectoryTree, tile: &mut Tile) {
    let node = tree.node(tile.node);
    if !node.is_dir_like() || node.total_size == 0 || tile.rect.area() < MIN_TILE_AREA {
        return;
    }

    let children: Vec<(NodeIndex, u64)> = tree
        .children_sorted_by_size(tile.node)
        .into_iter()
        .map(|idx| (idx, tree.node(idx).total_size))
        .filter(|&(_, size)| size > 0)
        .collect();
    if children.is_empty() {
        return;
    }

    let total_area = tile.rect.area();
    let parent_size = node.total_size as f64;
    let areas: Vec<f32> = children
        .iter()
        .map(|&(_, size)| (size as f64 / parent_size * total_area as f64) as f32)
        .collect();

    let rects = squarify(&areas, tile.rect);
    for (&(idx, _), rect) in children.iter().zip(rects) {
        let mut child = Tile {
            node: idx,
            rect,
            depth: tile.depth + 1,
            children: Vec::new(),
        };
        build_children(tree, &mut child);
        tile.children.push(child);
    }
}

/// Partition `bounds` into one rectangle per area, preserving order.
///
/// Areas must sum to at most the area of `bounds` (they sum to exactly it
/// when the caller includes every child).
fn squarify(areas: &[f32], bounds: Rect) -> Vec<Rect> {
    let mut rects: Vec<Rect> = Vec::with_capacity(areas.len());
    let mut remaining = bounds;
    let mut i = 0;

    while i < areas.len() {
        if remaining.w <= 0.0 || remaining.h <= 0.0 {
            // Degenerate remainder: the rest collapses to empty rectangles.
            for _ in i..areas.len() {
                rects.push(Rect::new(remaining.x, remaining.y, 0.0, 0.0));
            }
            break;
        }

        // Lay the next row along the shorter side of the remaining space.
        let layout_vertical = remaining.w >= remaining.h;
        let side = if layout_vertical {
            remaining.h
        } else {
            remaining.w
        };

        // Greedy row building: keep adding items while the worst aspect
        // ratio in the row improves.
        let row_start = i;
        let mut row_area = areas[i];
        let mut best_worst = worst_ratio(&areas[row_start..=i], side, row_area);
        i += 1;
        while i < areas.len() {
            let trial_area = row_area + areas[i];
            let trial_worst = worst_ratio(&areas[row_start..=i], side, trial_area);
            if trial_worst <= best_worst {
                row_area = trial_area;
                best_worst = trial_worst;
                i += 1;
            } else {
                break;
            }
        }

        // The row takes its share of the remaining rectangle.
        let remaining_total: f32 = areas[row_start..].iter().sum();
        let row_fraction = if remaining_total > 0.0 {
            (row_area / remaining_total).min(1.0)
        } else {
            1.0
        };

        let (row_rect, rest) = if layout_vertical {
            let row_w = remaining.w * row_fraction;
            (
                Rect::new(remaining.x, remaining.y, row_w, remaining.h),
                Rect::new(
                    remaining.x + row_w,
                    remaining.y,
                    remaining.w - row_w,
                    remaining.h,
                ),
            )
        } else {
            let row_h = remaining.h * row_fraction;
            (
                Rect::new(remaining.x, remaining.y, remaining.w, row_h),
                Rect::new(
                    remaining.x,
                    remaining.y + row_h,
                    remaining.w,
                    remaining.h - row_h,
                ),
            )
        };
        remaining = rest;

        // Slice the row among its items.
        let mut offset = 0.0;
        for &area in &areas[row_start..i] {
            let fraction = if row_area > 0.0 { area / row_area } else { 0.0 };
            let rect = if layout_vertical {
                let item_h = row_rect.h * fraction;
                let r = Rect::new(row_rect.x, row_rect.y + offset, row_rect.w, item_h);
                offset += item_h;
                r
            } else {
                let item_w = row_rect.w * fraction;
                let r = Rect::new(row_rect.x + offset, row_rect.y, item_w, row_rect.h);
                offset += item_w;
                r
            };
            rects.push(rect);
        }
    }

    rects
}

/// The worst (highest) aspect ratio a row of `areas` would have when laid
/// along a side of length `side` with combined area `total`.
fn worst_ratio(areas: &[f32], side: f32, total: f32) -> f32 {
    if side <= 0.0 || total <= 0.0 {
        return f32::MAX;
    }
    let thickness = total / side;
    let mut worst = 0.0_f32;
    for &area in areas {
        let length = area / thickness;
        let ratio = if length > thickness {
            length / thickness
        } else if length > 0.0 {
            thickness / length
        } else {
            f32::MAX
        };
        worst = worst.max(ratio);
    }
    worst
}

/// A zoomable treemap over one directory tree.
///
/// Holds the ancestors above the current layout root in a zoom stack so
/// "zoom out" can restore a previous root; the previous layout itself is
/// always recomputed fresh — tiles are never cached across a generation
/// change.
#[derive(Debug)]
pub struct TreemapView {
    bounds: Rect,
    root: NodeIndex,
    zoom_stack: Vec<NodeIndex>,
    tile: Option<Tile>,
    generation: u64,
}

impl TreemapView {
    /// Create a view rooted at `root` (typically the tree root).
    pub fn new(tree: &DirectoryTree, root: NodeIndex, bounds: Rect) -> Self {
        let mut view = Self {
            bounds,
            root,
            zoom_stack: Vec::new(),
            tile: None,
            generation: 0,
        };
        view.relayout(tree);
        view
    }

    /// The node the layout is currently rooted at.
    pub fn root(&self) -> NodeIndex {
        self.root
    }

    /// The rectangle the layout fills.
    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    /// The current tile tree.
    pub fn tile(&self) -> Option<&Tile> {
        self.tile.as_ref()
    }

    /// Recompute the layout from scratch. If the zoom target fell out of
    /// the tree (refresh, assume-deleted), the view falls back to the tree
    /// root and the zoom stack is discarded.
    pub fn relayout(&mut self, tree: &DirectoryTree) {
        if !tree.is_attached(self.root) {
            self.root = tree.root;
            self.zoom_stack.clear();
        }
        self.tile = Some(layout(tree, self.root, self.bounds));
        self.generation = tree.generation;
    }

    /// Recompute the layout only if the tree changed underneath it.
    pub fn ensure_current(&mut self, tree: &DirectoryTree) {
        if self.tile.is_none() || self.generation != tree.generation {
            self.relayout(tree);
        }
    }

    /// Change the layout bounds (e.g. the view was resized).
    pub fn set_bounds(&mut self, tree: &DirectoryTree, bounds: Rect) {
        self.bounds = bounds;
        self.relayout(tree);
    }

    /// Make `node` the new layout root, pushing the current root onto the
    /// zoom stack. Only dir-like nodes with a positive size can be zoomed
    /// into.
    pub fn zoom_in(&mut self, tree: &DirectoryTree, node: NodeIndex) -> bool {
        if node == self.root || !tree.is_attached(node) {
            return false;
        }
        let target = tree.node(node);
        if !target.is_dir_like() || target.total_size == 0 {
            return false;
        }
        self.zoom_stack.push(self.root);
        self.root = node;
        self.relayout(tree);
        true
    }

    /// Restore the previous layout root. Ancestors that no longer exist
    /// are skipped.
    pub fn zoom_out(&mut self, tree: &DirectoryTree) -> bool {
        while let Some(previous) = self.zoom_stack.pop() {
            if tree.is_attached(previous) {
                self.root = previous;
                self.relayout(tree);
                return true;
            }
        }
        false
    }

    /// The deepest tile containing the point, or `None` outside the layout.
    pub fn hit_test(&self, x: f32, y: f32) -> Option<&Tile> {
        let mut current = self.tile.as_ref()?;
        if !current.rect.contains(x, y) {
            return None;
        }
        'descend: loop {
            for child in &current.children {
                if child.rect.contains(x, y) {
                    current = child;
                    continue 'descend;
                }
            }
            return Some(current);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Node, ReadState};
    use std::path::Path;

    /// root
    ///   <Files>: a=500 b=300 c=200   (1000)
    ///   d/
    ///     <Files>: e=1000            (1000)
    fn sample_tree() -> (DirectoryTree, NodeIndex, NodeIndex) {
        let mut tree = DirectoryTree::new(Path::new("/scan"));
        let dot = tree.ensure_dot_entry(tree.root);
        tree.add_child(dot, Node::file("a".into(), 500));
        tree.add_child(dot, Node::file("b".into(), 300));
        tree.add_child(dot, Node::file("c".into(), 200));
        let d = tree.add_child(tree.root, Node::directory("d".into()));
        let d_dot = tree.ensure_dot_entry(d);
        let e = tree.add_child(d_dot, Node::file("e".into(), 1000));

        tree.node_mut(tree.root).read_state = ReadState::Reading;
        tree.node_mut(d).read_state = ReadState::Reading;
        tree.finalize_subtree(tree.root);
        (tree, d, e)
    }

    fn overlaps(a: &Rect, b: &Rect) -> bool {
        const EPS: f32 = 1e-3;
        a.x + EPS < b.x + b.w && b.x + EPS < a.x + a.w && a.y + EPS < b.y + b.h
            && b.y + EPS < a.y + a.h
    }

    fn check_partition(tile: &Tile) {
        let parent_area = tile.rect.area();
        let child_sum: f32 = tile.children.iter().map(|c| c.rect.area()).sum();
        assert!(
            child_sum <= parent_area + 0.5,
            "children exceed parent: {child_sum} > {parent_area}"
        );
        for (i, a) in tile.children.iter().enumerate() {
            for b in &tile.children[i + 1..] {
                assert!(!overlaps(&a.rect, &b.rect), "tiles overlap");
            }
        }
        for child in &tile.children {
            check_partition(child);
        }
    }

    #[test]
    fn partition_is_exact_and_non_overlapping() {
        let (tree, ..) = sample_tree();
        let root_tile = layout(&tree, tree.root, Rect::new(0.0, 0.0, 200.0, 100.0));

        check_partition(&root_tile);
        // No zero-size children here, so the partition is exact.
        let child_sum: f32 = root_tile.children.iter().map(|c| c.rect.area()).sum();
        assert!((child_sum - 20_000.0).abs() < 1.0);
        assert_eq!(root_tile.children.len(), 2);
    }

    #[test]
    fn zero_size_children_are_omitted() {
        let (mut tree, ..) = sample_tree();
        let dot = tree.dot_entry(tree.root).unwrap();
        tree.add_child(dot, Node::file("empty".into(), 0));
        tree.node_mut(tree.root).read_state = ReadState::Reading;
        tree.finalize_subtree(tree.root);

        let tile = layout(&tree, tree.root, Rect::new(0.0, 0.0, 100.0, 100.0));
        let dot_tile = tile
            .children
            .iter()
            .find(|t| t.node == dot)
            .expect("dot entry tile");
        // a, b, c — but not the zero-byte file.
        assert_eq!(dot_tile.children.len(), 3);
    }

    #[test]
    fn hit_test_returns_deepest_tile() {
        let (tree, _, e) = sample_tree();
        let view = TreemapView::new(&tree, tree.root, Rect::new(0.0, 0.0, 200.0, 100.0));

        let e_tile = find_tile(view.tile().unwrap(), e).expect("tile for e");
        let cx = e_tile.rect.x + e_tile.rect.w / 2.0;
        let cy = e_tile.rect.y + e_tile.rect.h / 2.0;
        let hit = view.hit_test(cx, cy).expect("hit");
        assert_eq!(hit.node, e);

        assert!(view.hit_test(-5.0, -5.0).is_none());
        assert!(view.hit_test(500.0, 500.0).is_none());
    }

    fn find_tile(tile: &Tile, node: NodeIndex) -> Option<&Tile> {
        if tile.node == node {
            return Some(tile);
        }
        tile.children.iter().find_map(|c| find_tile(c, node))
    }

    #[test]
    fn zoom_stack_restores_previous_root() {
        let (tree, d, _) = sample_tree();
        let mut view = TreemapView::new(&tree, tree.root, Rect::new(0.0, 0.0, 100.0, 100.0));

        assert!(view.zoom_in(&tree, d));
        assert_eq!(view.root(), d);
        assert!(view.zoom_out(&tree));
        assert_eq!(view.root(), tree.root);
        assert!(!view.zoom_out(&tree));
    }

    #[test]
    fn zoom_into_file_is_refused() {
        let (tree, _, e) = sample_tree();
        let mut view = TreemapView::new(&tree, tree.root, Rect::new(0.0, 0.0, 100.0, 100.0));
        assert!(!view.zoom_in(&tree, e));
        assert_eq!(view.root(), tree.root);
    }

    #[test]
    fn layout_follows_generation_changes() {
        let (mut tree, d, _) = sample_tree();
        let mut view = TreemapView::new(&tree, tree.root, Rect::new(0.0, 0.0, 100.0, 100.0));
        assert_eq!(view.tile().unwrap().children.len(), 2);

        let total_before = tree.node(tree.root).total_size;
        tree.detach(d);
        tree.reaggregate_upward(tree.root);
        view.ensure_current(&tree);

        assert_eq!(view.tile().unwrap().children.len(), 1);
        assert!(tree.node(tree.root).total_size < total_before);
    }

    #[test]
    fn zoomed_view_falls_back_when_root_vanishes() {
        let (mut tree, d, _) = sample_tree();
        let mut view = TreemapView::new(&tree, tree.root, Rect::new(0.0, 0.0, 100.0, 100.0));
        assert!(view.zoom_in(&tree, d));

        tree.detach(d);
        tree.reaggregate_upward(tree.root);
        view.ensure_current(&tree);

        assert_eq!(view.root(), tree.root);
    }
}
