//! Out-of-process cleanup execution.
//!
//! Invocations run on a worker thread so the session thread — the only
//! owner of the tree — is never blocked on an external command. The worker
//! holds no tree access at all: it receives pre-expanded commands and sends
//! one [`CleanupOutcome`] per invocation back over a channel, where the
//! session applies the refresh policy. A failing command reports an error
//! outcome and the remaining invocations in the batch still run.

use crate::cleanup::{Cleanup, RefreshPolicy};
use crate::error::CleanupError;
use crate::model::{DirectoryTree, NodeIndex, NodeKind};
use std::path::PathBuf;
use std::process::Command;
use std::thread;
use tracing::{debug, warn};

/// Completion report for one cleanup invocation.
#[derive(Debug)]
pub struct CleanupOutcome {
    pub cleanup_id: String,
    /// The node the invocation targeted.
    pub node: NodeIndex,
    /// Identity of the tree the invocation was started on. Outcomes for a
    /// tree that has since been replaced are discarded.
    pub tree_id: u64,
    pub path: PathBuf,
    pub refresh_policy: RefreshPolicy,
    pub result: Result<(), CleanupError>,
}

/// Sending half of the outcome channel.
pub type OutcomeSender = crossbeam_channel::Sender<CleanupOutcome>;

/// Receiving half of the outcome channel.
pub type OutcomeReceiver = crossbeam_channel::Receiver<CleanupOutcome>;

/// One pre-expanded command, ready to run without tree access.
struct Invocation {
    node: NodeIndex,
    path: PathBuf,
    command: String,
}

/// Execute `cleanup` for every node in `selection`, asynchronously.
///
/// If the cleanup recurses, every Directory descendant of a selected node
/// is invoked too, pre-order. Returns the number of invocations queued;
/// outcomes arrive on `outcomes` as each command finishes.
pub fn execute(
    tree: &DirectoryTree,
    cleanup: &Cleanup,
    selection: &[NodeIndex],
    outcomes: &OutcomeSender,
) -> usize {
    let mut invocations: Vec<Invocation> = Vec::new();

    for &selected in selection {
        push_invocation(tree, cleanup, selected, &mut invocations);
        if cleanup.recurse {
            for idx in tree.subtree(selected) {
                if idx != selected && tree.node(idx).kind == NodeKind::Directory {
                    push_invocation(tree, cleanup, idx, &mut invocations);
                }
            }
        }
    }

    let count = invocations.len();
    let cleanup_id = cleanup.id.clone();
    let refresh_policy = cleanup.refresh_policy;
    let tree_id = tree.id;
    let tx = outcomes.clone();

    thread::Builder::new()
        .name("spacescout-cleanup".into())
        .spawn(move || {
            for invocation in invocations {
                let result = run_command(&invocation.command);
                if let Err(err) = &result {
                    warn!(
                        "cleanup '{cleanup_id}' failed for {}: {err}",
                        invocation.path.display()
                    );
                }
                let _ = tx.send(CleanupOutcome {
                    cleanup_id: cleanup_id.clone(),
                    node: invocation.node,
                    tree_id,
                    path: invocation.path,
                    refresh_policy,
                    result,
                });
            }
        })
        .expect("failed to spawn cleanup thread");

    count
}

fn push_invocation(
    tree: &DirectoryTree,
    cleanup: &Cleanup,
    node: NodeIndex,
    invocations: &mut Vec<Invocation>,
) {
    let path = tree.full_path(node);
    let name = tree.node(node).name.to_string();
    let command = cleanup.expand_command(&path, &name);
    debug!("queueing cleanup '{}': {command}", cleanup.id);
    invocations.push(Invocation {
        node,
        path,
        command,
    });
}

fn run_command(command: &str) -> Result<(), CleanupError> {
    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .output()
        .map_err(CleanupError::Spawn)?;

    if output.status.success() {
        Ok(())
    } else {
        match output.status.code() {
            Some(code) => Err(CleanupError::Failed(code)),
            None => Err(CleanupError::Signalled),
        }
    }
}
