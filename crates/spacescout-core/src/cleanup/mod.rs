//! Cleanup actions — configurable external commands applied to selected
//! nodes.
//!
//! A [`CleanupCollection`] is an ordered sequence: the standard actions
//! first, then up to [`USER_CLEANUP_SLOTS`] free-form user actions. The
//! collection is a plain value — reverting to defaults is an assignment —
//! and persists itself as a JSON key-value mapping whose store is owned by
//! the caller. An invalid persisted entry falls back to the built-in
//! default for that id rather than poisoning the whole collection.

pub mod exec;

pub use exec::{execute, CleanupOutcome, OutcomeReceiver, OutcomeSender};

use crate::error::ConfigError;
use crate::model::{DirectoryTree, NodeIndex, NodeKind, ReadState};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use tracing::warn;

/// Maximum number of user-defined cleanup actions.
pub const USER_CLEANUP_SLOTS: usize = 10;

/// What happens to the tree after an invocation completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshPolicy {
    /// The command does not change what is on disk (open, inspect).
    None,
    /// Re-scan the affected subtree from the filesystem.
    RefreshThisSubtree,
    /// Drop the node from the tree without a filesystem round-trip — an
    /// optimistic update reconciled by the next real scan of an ancestor.
    AssumeDeleted,
}

/// Node kinds a cleanup may be applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AppliesTo {
    #[serde(default)]
    pub files: bool,
    #[serde(default)]
    pub directories: bool,
    #[serde(default)]
    pub dot_entries: bool,
    #[serde(default)]
    pub mount_points: bool,
}

impl AppliesTo {
    /// `true` if `kind` is covered. Excluded nodes are never valid targets.
    pub fn includes(&self, kind: NodeKind) -> bool {
        match kind {
            NodeKind::File => self.files,
            NodeKind::Directory => self.directories,
            NodeKind::DotEntry => self.dot_entries,
            NodeKind::MountPoint => self.mount_points,
            NodeKind::Excluded => false,
        }
    }
}

/// One configurable cleanup action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cleanup {
    /// Stable identifier, also the key in the persisted configuration.
    #[serde(skip)]
    pub id: String,
    pub title: String,
    /// Command template run via `sh -c`. `%p` expands to the shell-quoted
    /// full path of the node, `%n` to its quoted name, `%%` to a literal
    /// percent sign.
    pub command: String,
    pub applies_to: AppliesTo,
    /// Run the command for every directory descendant too, pre-order.
    #[serde(default)]
    pub recurse: bool,
    pub refresh_policy: RefreshPolicy,
}

impl Cleanup {
    /// Expand the command template for a concrete node.
    pub fn expand_command(&self, path: &Path, name: &str) -> String {
        let mut expanded = String::with_capacity(self.command.len() + 32);
        let mut chars = self.command.chars();
        while let Some(ch) = chars.next() {
            if ch != '%' {
                expanded.push(ch);
                continue;
            }
            match chars.next() {
                Some('p') => expanded.push_str(&shell_quote(&path.to_string_lossy())),
                Some('n') => expanded.push_str(&shell_quote(name)),
                Some('%') => expanded.push('%'),
                Some(other) => {
                    expanded.push('%');
                    expanded.push(other);
                }
                None => expanded.push('%'),
            }
        }
        expanded
    }

    /// A cleanup is enabled for a selection iff the selection is non-empty
    /// and every selected node's kind is covered and no selected node is
    /// currently being read — a node is never mutated mid-scan.
    pub fn is_enabled(&self, tree: &DirectoryTree, selection: &[NodeIndex]) -> bool {
        !selection.is_empty()
            && selection.iter().all(|&idx| {
                tree.is_attached(idx) && {
                    let node = tree.node(idx);
                    self.applies_to.includes(node.kind)
                        && node.read_state != ReadState::Reading
                }
            })
    }
}

/// Single-quote a string for `sh -c`.
fn shell_quote(text: &str) -> String {
    let mut quoted = String::with_capacity(text.len() + 2);
    quoted.push('\'');
    for ch in text.chars() {
        if ch == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(ch);
        }
    }
    quoted.push('\'');
    quoted
}

/// The ordered set of cleanup actions for one session.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanupCollection {
    cleanups: Vec<Cleanup>,
}

impl CleanupCollection {
    /// The built-in standard actions, in their fixed order.
    pub fn standard() -> Self {
        let cleanups = vec![
            Cleanup {
                id: "open_file_manager".into(),
                title: "Open File Manager Here".into(),
                command: "xdg-open %p".into(),
                applies_to: AppliesTo {
                    files: true,
                    directories: true,
                    dot_entries: true,
                    mount_points: true,
                },
                recurse: false,
                refresh_policy: RefreshPolicy::None,
            },
            Cleanup {
                id: "open_in_terminal".into(),
                title: "Open Terminal Here".into(),
                command: "x-terminal-emulator --working-directory=%p".into(),
                applies_to: AppliesTo {
                    files: false,
                    directories: true,
                    dot_entries: true,
                    mount_points: true,
                },
                recurse: false,
                refresh_policy: RefreshPolicy::None,
            },
            Cleanup {
                id: "compress".into(),
                title: "Compress to Archive".into(),
                command: "cd %p/.. && tar cjf %n.tar.bz2 %n && rm -rf %p".into(),
                applies_to: AppliesTo {
                    files: false,
                    directories: true,
                    dot_entries: false,
                    mount_points: false,
                },
                recurse: false,
                refresh_policy: RefreshPolicy::AssumeDeleted,
            },
            Cleanup {
                id: "make_clean".into(),
                title: "make clean".into(),
                command: "cd %p && make clean".into(),
                applies_to: AppliesTo {
                    files: false,
                    directories: true,
                    dot_entries: false,
                    mount_points: false,
                },
                recurse: false,
                refresh_policy: RefreshPolicy::RefreshThisSubtree,
            },
            Cleanup {
                id: "hard_delete".into(),
                title: "Delete (no way back!)".into(),
                command: "rm -rf %p".into(),
                applies_to: AppliesTo {
                    files: true,
                    directories: true,
                    dot_entries: false,
                    mount_points: false,
                },
                recurse: false,
                refresh_policy: RefreshPolicy::AssumeDeleted,
            },
        ];
        Self { cleanups }
    }

    /// Look up a cleanup by id.
    pub fn get(&self, id: &str) -> Option<&Cleanup> {
        self.cleanups.iter().find(|c| c.id == id)
    }

    /// All cleanups in order.
    pub fn iter(&self) -> impl Iterator<Item = &Cleanup> {
        self.cleanups.iter()
    }

    /// Number of user-defined actions currently present.
    pub fn user_count(&self) -> usize {
        self.cleanups
            .iter()
            .filter(|c| !Self::is_standard_id(&c.id))
            .count()
    }

    fn is_standard_id(id: &str) -> bool {
        Self::standard().cleanups.iter().any(|c| c.id == id)
    }

    /// Whether the cleanup with `id` is enabled for `selection`.
    pub fn is_enabled(&self, id: &str, tree: &DirectoryTree, selection: &[NodeIndex]) -> bool {
        self.get(id)
            .is_some_and(|c| c.is_enabled(tree, selection))
    }

    /// Add (or replace) a user-defined cleanup. Bounded by
    /// [`USER_CLEANUP_SLOTS`].
    pub fn add_user_cleanup(&mut self, cleanup: Cleanup) -> Result<(), ConfigError> {
        if let Some(existing) = self.cleanups.iter_mut().find(|c| c.id == cleanup.id) {
            *existing = cleanup;
            return Ok(());
        }
        if self.user_count() >= USER_CLEANUP_SLOTS {
            return Err(ConfigError::SlotsExhausted(USER_CLEANUP_SLOTS));
        }
        self.cleanups.push(cleanup);
        Ok(())
    }

    /// Remove a user-defined cleanup. Standard actions cannot be removed.
    pub fn remove_user_cleanup(&mut self, id: &str) -> bool {
        if Self::is_standard_id(id) {
            return false;
        }
        let before = self.cleanups.len();
        self.cleanups.retain(|c| c.id != id);
        self.cleanups.len() != before
    }

    /// Revert the whole collection to the built-in defaults — a value copy
    /// of the standard ordered sequence.
    pub fn reset_to_defaults(&mut self) {
        *self = Self::standard();
    }

    /// Merge a persisted key-value configuration into this collection.
    ///
    /// Known ids are overridden in place; unknown ids become user cleanups
    /// (in sorted key order, since the store carries no ordering). Invalid
    /// entries keep the built-in/current definition for that slot. Returns
    /// the number of entries that had to fall back.
    pub fn apply_settings(&mut self, settings: &Map<String, Value>) -> u32 {
        let mut fallbacks = 0u32;

        let mut keys: Vec<&String> = settings.keys().collect();
        keys.sort();

        for id in keys {
            let value = &settings[id.as_str()];
            match serde_json::from_value::<Cleanup>(value.clone()) {
                Ok(mut cleanup) => {
                    cleanup.id = id.clone();
                    if let Some(existing) = self.cleanups.iter_mut().find(|c| &c.id == id) {
                        *existing = cleanup;
                    } else if self.add_user_cleanup(cleanup).is_err() {
                        warn!("ignoring persisted cleanup '{id}': no free user slot");
                        fallbacks += 1;
                    }
                }
                Err(source) => {
                    let err = ConfigError::InvalidDefinition {
                        id: id.clone(),
                        source,
                    };
                    warn!("{err}; keeping built-in definition");
                    fallbacks += 1;
                }
            }
        }
        fallbacks
    }

    /// Export the collection as a key-value configuration for the external
    /// store.
    pub fn settings(&self) -> Map<String, Value> {
        let mut map = Map::new();
        for cleanup in &self.cleanups {
            // Serialization of a plain struct with serializable fields
            // cannot fail; fall back to null rather than propagate.
            let value = serde_json::to_value(cleanup).unwrap_or(Value::Null);
            map.insert(cleanup.id.clone(), value);
        }
        map
    }
}

impl Default for CleanupCollection {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Node;
    use std::path::Path;

    fn tree_with_file_and_dir() -> (DirectoryTree, NodeIndex, NodeIndex) {
        let mut tree = DirectoryTree::new(Path::new("/scan"));
        let dir = tree.add_child(tree.root, Node::directory("build".into()));
        let dot = tree.ensure_dot_entry(tree.root);
        let file = tree.add_child(dot, Node::file("core.dump".into(), 42));
        tree.node_mut(dir).read_state = ReadState::Finished;
        (tree, dir, file)
    }

    #[test]
    fn enablement_checks_kind_and_read_state() {
        let (mut tree, dir, file) = tree_with_file_and_dir();
        let cleanups = CleanupCollection::standard();

        assert!(cleanups.is_enabled("hard_delete", &tree, &[dir]));
        assert!(cleanups.is_enabled("hard_delete", &tree, &[dir, file]));
        // make_clean applies to directories only.
        assert!(!cleanups.is_enabled("make_clean", &tree, &[file]));
        // Empty selection disables everything.
        assert!(!cleanups.is_enabled("hard_delete", &tree, &[]));
        // A node being read is never a valid target.
        tree.node_mut(dir).read_state = ReadState::Reading;
        assert!(!cleanups.is_enabled("hard_delete", &tree, &[dir]));
    }

    #[test]
    fn template_expansion_quotes_paths() {
        let cleanup = Cleanup {
            id: "t".into(),
            title: "t".into(),
            command: "rm -rf %p && echo %n %% done".into(),
            applies_to: AppliesTo::default(),
            recurse: false,
            refresh_policy: RefreshPolicy::None,
        };
        let expanded = cleanup.expand_command(Path::new("/tmp/it's here"), "it's here");
        assert_eq!(
            expanded,
            "rm -rf '/tmp/it'\\''s here' && echo 'it'\\''s here' % done"
        );
    }

    #[test]
    fn user_slots_are_bounded() {
        let mut cleanups = CleanupCollection::standard();
        for i in 0..USER_CLEANUP_SLOTS {
            let cleanup = Cleanup {
                id: format!("user_{i}"),
                title: format!("User {i}"),
                command: "true".into(),
                applies_to: AppliesTo::default(),
                recurse: false,
                refresh_policy: RefreshPolicy::None,
            };
            assert!(cleanups.add_user_cleanup(cleanup).is_ok());
        }
        let overflow = Cleanup {
            id: "one_too_many".into(),
            title: "Overflow".into(),
            command: "true".into(),
            applies_to: AppliesTo::default(),
            recurse: false,
            refresh_policy: RefreshPolicy::None,
        };
        assert!(matches!(
            cleanups.add_user_cleanup(overflow),
            Err(ConfigError::SlotsExhausted(_))
        ));
        assert_eq!(cleanups.user_count(), USER_CLEANUP_SLOTS);
    }

    #[test]
    fn reset_restores_defaults() {
        let mut cleanups = CleanupCollection::standard();
        cleanups
            .add_user_cleanup(Cleanup {
                id: "user_0".into(),
                title: "User".into(),
                command: "true".into(),
                applies_to: AppliesTo::default(),
                recurse: false,
                refresh_policy: RefreshPolicy::None,
            })
            .unwrap();
        assert_ne!(cleanups, CleanupCollection::standard());
        cleanups.reset_to_defaults();
        assert_eq!(cleanups, CleanupCollection::standard());
    }

    #[test]
    fn settings_round_trip() {
        let mut cleanups = CleanupCollection::standard();
        cleanups
            .add_user_cleanup(Cleanup {
                id: "purge_logs".into(),
                title: "Purge Logs".into(),
                command: "rm -f %p/*.log".into(),
                applies_to: AppliesTo {
                    directories: true,
                    ..AppliesTo::default()
                },
                recurse: true,
                refresh_policy: RefreshPolicy::RefreshThisSubtree,
            })
            .unwrap();

        let settings = cleanups.settings();
        let mut restored = CleanupCollection::standard();
        let fallbacks = restored.apply_settings(&settings);

        assert_eq!(fallbacks, 0);
        assert_eq!(restored, cleanups);
    }

    #[test]
    fn invalid_setting_falls_back_to_builtin() {
        let mut cleanups = CleanupCollection::standard();
        let mut settings = Map::new();
        settings.insert("hard_delete".to_string(), Value::String("nonsense".into()));

        let fallbacks = cleanups.apply_settings(&settings);
        assert_eq!(fallbacks, 1);
        assert_eq!(
            cleanups.get("hard_delete"),
            CleanupCollection::standard().get("hard_delete")
        );
    }
}
