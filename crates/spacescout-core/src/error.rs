//! Error taxonomy for the engine.
//!
//! Scan-time filesystem failures are recovered locally (the offending entry
//! becomes an Excluded or Aborted node and the walk continues); the variants
//! here cover the cases that are reported to callers. Nothing in this crate
//! escalates to process termination — the worst-case outcome is a
//! partially-aggregated, clearly-flagged tree.

use crate::model::NodeKind;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failures around scanning and subtree refresh.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("cannot read directory {path}: {source}")]
    DirRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("entry vanished during scan: {0}")]
    Vanished(PathBuf),

    #[error("refresh target must be a directory or mount point, not {0:?}")]
    NotRefreshable(NodeKind),

    #[error("node is currently being read")]
    Busy,

    #[error("node is no longer part of the tree")]
    Detached,

    #[error("mount point has already been read")]
    AlreadyContinued,
}

/// Failures reading or writing a cache snapshot.
///
/// Individual malformed records are NOT errors — the reader skips them and
/// reports a warning count. This enum covers the cases where no usable tree
/// can be produced at all.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("not a spacescout cache file (bad or missing header)")]
    BadHeader,

    #[error("cache contains no readable root record")]
    NoRoot,
}

/// Per-invocation failures of cleanup execution.
#[derive(Debug, Error)]
pub enum CleanupError {
    #[error("failed to launch command: {0}")]
    Spawn(#[source] io::Error),

    #[error("command exited with status {0}")]
    Failed(i32),

    #[error("command terminated by a signal")]
    Signalled,

    #[error("no cleanup with id '{0}'")]
    UnknownId(String),

    #[error("cleanup '{0}' is not enabled for the current selection")]
    NotEnabled(String),
}

/// Failures around persisted cleanup configuration. A bad persisted entry
/// falls back to the built-in default for that slot.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("all {0} user cleanup slots are in use")]
    SlotsExhausted(usize),

    #[error("invalid cleanup definition for '{id}': {source}")]
    InvalidDefinition {
        id: String,
        #[source]
        source: serde_json::Error,
    },
}
