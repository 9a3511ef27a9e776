//! End-to-end cleanup execution tests.
//!
//! Cleanups run real external commands (`sh -c`) against a real tempdir
//! tree, complete on a worker thread, and are applied to the tree by
//! `Session::pump` on the owner thread. These tests verify the whole loop:
//! enablement, template expansion, per-invocation outcomes, refresh
//! policies, and the optimistic assume-deleted update.

use spacescout_core::cleanup::{AppliesTo, Cleanup, RefreshPolicy};
use spacescout_core::events::EngineEvent;
use spacescout_core::model::{DirectoryTree, NodeIndex};
use spacescout_core::scan::ScanOptions;
use spacescout_core::session::{Session, WEIGHT_CLEANUP};
use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::{Duration, Instant};
use tempfile::TempDir;

// ── Helpers ─────────────────────────────────────────────────────────

fn write_bytes(path: &Path, n: usize) {
    let mut f = fs::File::create(path).unwrap();
    f.write_all(&vec![0u8; n]).unwrap();
}

/// `a/x.bin` = 100, `a/sub/y.bin` = 200, `other.txt` = 400.
fn build_tree(root: &Path) {
    let a = root.join("a");
    fs::create_dir_all(a.join("sub")).unwrap();
    write_bytes(&a.join("x.bin"), 100);
    write_bytes(&a.join("sub").join("y.bin"), 200);
    write_bytes(&root.join("other.txt"), 400);
}

fn child_by_name(tree: &DirectoryTree, parent: NodeIndex, name: &str) -> Option<NodeIndex> {
    tree.children(parent)
        .into_iter()
        .find(|&c| tree.node(c).name == name)
}

/// Pump the session until all in-flight cleanup outcomes are applied.
fn drain_outcomes(session: &mut Session) {
    let deadline = Instant::now() + Duration::from_secs(30);
    while session.in_flight() > 0 {
        assert!(
            Instant::now() < deadline,
            "cleanup outcomes did not arrive within 30 seconds"
        );
        session.pump();
        std::thread::sleep(Duration::from_millis(5));
    }
    // One more pass so policies applied by the last outcome settle.
    session.pump();
}

fn user_cleanup(id: &str, command: &str, recurse: bool, policy: RefreshPolicy) -> Cleanup {
    Cleanup {
        id: id.to_string(),
        title: id.to_string(),
        command: command.to_string(),
        applies_to: AppliesTo {
            files: true,
            directories: true,
            dot_entries: false,
            mount_points: false,
        },
        recurse,
        refresh_policy: policy,
    }
}

// ── Tests ───────────────────────────────────────────────────────────

/// Recursive delete with `AssumeDeleted`: the node disappears from the
/// tree without a filesystem round-trip and the root shrinks by exactly
/// the subtree's prior size.
#[test]
fn hard_delete_removes_node_and_shrinks_root() {
    let tmp = TempDir::new().expect("failed to create temp dir");
    build_tree(tmp.path());

    let mut session = Session::new(ScanOptions::default());
    session.scan(tmp.path());

    let (a, a_size, root_before) = {
        let tree = session.tree().unwrap();
        let a = child_by_name(tree, tree.root, "a").expect("node a");
        (a, tree.node(a).total_size, tree.node(tree.root).total_size)
    };
    assert_eq!(a_size, 300);
    assert_eq!(root_before, 700);

    session.select(vec![a]);
    assert!(session.cleanup_enabled("hard_delete"));
    let queued = session.execute_cleanup("hard_delete").expect("execute");
    assert_eq!(queued, 1);

    drain_outcomes(&mut session);

    let tree = session.tree().unwrap();
    assert!(child_by_name(tree, tree.root, "a").is_none());
    assert_eq!(tree.node(tree.root).total_size, root_before - a_size);
    assert!(!tmp.path().join("a").exists());
    // The deleted node left the selection with it.
    assert!(session.selection().is_empty());
}

/// A failing command reports an error outcome per invocation and never
/// aborts the rest of a recursive batch.
#[test]
fn failing_command_reports_every_outcome() {
    let tmp = TempDir::new().expect("failed to create temp dir");
    build_tree(tmp.path());

    let mut session = Session::new(ScanOptions::default());
    session
        .cleanups_mut()
        .add_user_cleanup(user_cleanup(
            "always_fails",
            "exit 3",
            true,
            RefreshPolicy::None,
        ))
        .unwrap();
    session.scan(tmp.path());
    let events = session.subscribe();

    let (a, root_before) = {
        let tree = session.tree().unwrap();
        let a = child_by_name(tree, tree.root, "a").expect("node a");
        (a, tree.node(tree.root).total_size)
    };

    session.select(vec![a]);
    // `a` itself plus its directory descendant `sub`, pre-order.
    let queued = session.execute_cleanup("always_fails").expect("execute");
    assert_eq!(queued, 2);

    drain_outcomes(&mut session);

    let failures: Vec<EngineEvent> = events
        .try_iter()
        .filter(|e| matches!(e, EngineEvent::CleanupFinished { error: Some(_), .. }))
        .collect();
    assert_eq!(failures.len(), 2);

    // Nothing was mutated.
    let tree = session.tree().unwrap();
    assert_eq!(tree.node(tree.root).total_size, root_before);
    assert!(child_by_name(tree, tree.root, "a").is_some());
}

/// `%p` expansion reaches the shell intact, quoting included.
#[test]
fn command_template_expands_to_real_paths() {
    let tmp = TempDir::new().expect("failed to create temp dir");
    build_tree(tmp.path());

    let mut session = Session::new(ScanOptions::default());
    session
        .cleanups_mut()
        .add_user_cleanup(user_cleanup(
            "stamp",
            "touch %p.done",
            false,
            RefreshPolicy::None,
        ))
        .unwrap();
    session.scan(tmp.path());

    let a = {
        let tree = session.tree().unwrap();
        child_by_name(tree, tree.root, "a").expect("node a")
    };
    session.select(vec![a]);
    session.execute_cleanup("stamp").expect("execute");
    drain_outcomes(&mut session);

    assert!(tmp.path().join("a.done").exists());
}

/// `RefreshThisSubtree` re-reads the target from disk after the command
/// changed it.
#[test]
fn refresh_policy_rescans_the_subtree() {
    let tmp = TempDir::new().expect("failed to create temp dir");
    build_tree(tmp.path());

    let mut session = Session::new(ScanOptions::default());
    session
        .cleanups_mut()
        .add_user_cleanup(user_cleanup(
            "drop_sub",
            "rm -rf %p/sub",
            false,
            RefreshPolicy::RefreshThisSubtree,
        ))
        .unwrap();
    session.scan(tmp.path());

    let a = {
        let tree = session.tree().unwrap();
        child_by_name(tree, tree.root, "a").expect("node a")
    };
    session.select(vec![a]);
    session.execute_cleanup("drop_sub").expect("execute");
    drain_outcomes(&mut session);

    let tree = session.tree().unwrap();
    let a = child_by_name(tree, tree.root, "a").expect("node a");
    assert!(child_by_name(tree, a, "sub").is_none());
    assert_eq!(tree.node(a).total_size, 100);
    assert_eq!(tree.node(tree.root).total_size, 500);
}

/// Every successful invocation feeds the activity tracker.
#[test]
fn successful_cleanup_tracks_activity() {
    let tmp = TempDir::new().expect("failed to create temp dir");
    build_tree(tmp.path());

    let mut session = Session::new(ScanOptions::default());
    session
        .cleanups_mut()
        .add_user_cleanup(user_cleanup("noop", "true", false, RefreshPolicy::None))
        .unwrap();
    session.scan(tmp.path());

    let a = {
        let tree = session.tree().unwrap();
        child_by_name(tree, tree.root, "a").expect("node a")
    };
    session.select(vec![a]);
    let score_before = session.tracker().score();
    session.execute_cleanup("noop").expect("execute");
    drain_outcomes(&mut session);

    assert!(session.tracker().score() >= score_before + WEIGHT_CLEANUP as u64);
}
