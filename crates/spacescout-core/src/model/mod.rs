//! Data model for the spacescout directory tree.
//!
//! Re-exports the arena-allocated tree structure and supporting types.

pub mod node;
pub mod size;
pub mod tree;

pub use node::{Node, NodeIndex, NodeKind, ReadState, DOT_ENTRY_NAME};
pub use tree::DirectoryTree;
