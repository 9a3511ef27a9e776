//! Cache codec — text snapshot of a directory tree.
//!
//! The format is line-oriented and pre-order: a node's record always
//! precedes its children's, and a trailing `E` marker closes the most
//! recently opened directory so the reader reconstructs depth without
//! indentation-sensitive parsing.
//!
//! ```text
//! [spacescout cache 1.0]
//! # written 2024-11-02T09:41:00+00:00
//! D /home/user 0 0x653fa2c1 4
//! F notes.txt 1024 0x653fa2c0 1
//! D projects 0 0x653fa2bf 2
//! X locked 0
//! E
//! E
//! ```
//!
//! The first record carries the absolute scan path; every other record
//! carries just the entry name, percent-escaped. Files are recorded under
//! their directory and routed back into the `<Files>` bucket on load, so
//! DotEntry nodes are never serialized. Unknown trailing fields on a record
//! are ignored; malformed records are skipped with a warning count, and a
//! truncated stream finalizes open directories with whatever children were
//! recovered — loading a corrupt cache degrades, it does not fail.

use crate::error::CacheError;
use crate::model::{DirectoryTree, Node, NodeIndex, NodeKind, ReadState};
use compact_str::CompactString;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

/// First line of every cache file. The minor version may grow; readers
/// only check the prefix.
pub const CACHE_HEADER: &str = "[spacescout cache 1.0]";

const CACHE_HEADER_PREFIX: &str = "[spacescout cache";

/// Write `tree` as a cache snapshot.
pub fn write_cache<W: Write>(tree: &DirectoryTree, out: W) -> io::Result<()> {
    let mut out = BufWriter::new(out);
    writeln!(out, "{CACHE_HEADER}")?;
    writeln!(out, "# written {}", chrono::Utc::now().to_rfc3339())?;
    writeln!(out, "# kind name size mtime links")?;

    enum Step {
        Visit(NodeIndex),
        Close,
    }

    let mut stack = vec![Step::Visit(tree.root)];
    while let Some(step) = stack.pop() {
        let index = match step {
            Step::Close => {
                writeln!(out, "E")?;
                continue;
            }
            Step::Visit(index) => index,
        };
        let node = tree.node(index);

        match node.kind {
            NodeKind::Directory | NodeKind::MountPoint => {
                let tag = if node.kind == NodeKind::MountPoint { "M" } else { "D" };
                let name = if index == tree.root {
                    escape(&tree.path.to_string_lossy())
                } else {
                    escape(&node.name)
                };
                writeln!(
                    out,
                    "{tag} {name} {} 0x{:x} {}",
                    node.own_size,
                    mtime_secs(node.mtime),
                    node.link_count,
                )?;

                // Children in insertion order, with each DotEntry bucket
                // replaced by its files inline.
                let mut flat: Vec<NodeIndex> = Vec::new();
                for child in tree.children(index) {
                    if tree.node(child).kind == NodeKind::DotEntry {
                        flat.extend(tree.children(child));
                    } else {
                        flat.push(child);
                    }
                }
                stack.push(Step::Close);
                for &child in flat.iter().rev() {
                    stack.push(Step::Visit(child));
                }
            }
            NodeKind::File => {
                writeln!(
                    out,
                    "F {} {} 0x{:x} {}",
                    escape(&node.name),
                    node.own_size,
                    mtime_secs(node.mtime),
                    node.link_count,
                )?;
            }
            NodeKind::Excluded => {
                writeln!(out, "X {} {}", escape(&node.name), node.own_size)?;
            }
            NodeKind::DotEntry => {
                // Inlined into the parent directory above.
            }
        }
    }
    out.flush()
}

/// Write `tree` to a cache file at `path`.
pub fn write_cache_file(tree: &DirectoryTree, path: &Path) -> io::Result<()> {
    let file = File::create(path)?;
    write_cache(tree, file)?;
    info!("cache written to {}", path.display());
    Ok(())
}

/// Read a cache snapshot, rebuilding the tree and its aggregates.
///
/// Returns the tree together with the number of records that had to be
/// skipped.
pub fn read_cache<R: BufRead>(input: R) -> Result<(DirectoryTree, u32), CacheError> {
    let mut lines = input.lines();

    let header = loop {
        match lines.next() {
            Some(line) => {
                let line = line?;
                if !line.trim().is_empty() {
                    break line;
                }
            }
            None => return Err(CacheError::BadHeader),
        }
    };
    if !header.trim_start().starts_with(CACHE_HEADER_PREFIX) {
        return Err(CacheError::BadHeader);
    }

    let mut tree: Option<DirectoryTree> = None;
    let mut stack: Vec<NodeIndex> = Vec::new();
    let mut warnings = 0u32;

    for line in lines {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();

        match fields[0] {
            "D" | "M" => {
                let Some((name, size, mtime, links)) = parse_entry(&fields) else {
                    skip(line, &mut warnings);
                    continue;
                };
                let kind = if fields[0] == "M" {
                    NodeKind::MountPoint
                } else {
                    NodeKind::Directory
                };

                match stack.last().copied() {
                    None => {
                        if tree.is_some() {
                            // A second top-level record — there is one root.
                            skip(line, &mut warnings);
                            continue;
                        }
                        // Root record: the name field is the scan path.
                        let path = PathBuf::from(&name);
                        let mut t = DirectoryTree::new(&path);
                        let root = t.root;
                        let node = t.node_mut(root);
                        node.kind = kind;
                        node.own_size = size;
                        node.mtime = mtime;
                        node.link_count = links;
                        node.read_state = ReadState::Reading;
                        stack.push(root);
                        tree = Some(t);
                    }
                    Some(top) => {
                        let Some(t) = tree.as_mut() else {
                            skip(line, &mut warnings);
                            continue;
                        };
                        wake_mount(t, top);
                        let mut node = if kind == NodeKind::MountPoint {
                            Node::mount_point(CompactString::new(&name))
                        } else {
                            let mut d = Node::directory(CompactString::new(&name));
                            d.read_state = ReadState::Reading;
                            d
                        };
                        node.own_size = size;
                        node.mtime = mtime;
                        node.link_count = links;
                        let idx = t.add_child(top, node);
                        stack.push(idx);
                    }
                }
            }
            "F" => {
                let Some((name, size, mtime, links)) = parse_entry(&fields) else {
                    skip(line, &mut warnings);
                    continue;
                };
                let Some(top) = stack.last().copied() else {
                    skip(line, &mut warnings);
                    continue;
                };
                let Some(t) = tree.as_mut() else {
                    skip(line, &mut warnings);
                    continue;
                };
                wake_mount(t, top);
                let bucket = t.ensure_dot_entry(top);
                let mut node = Node::file(CompactString::new(&name), size);
                node.mtime = mtime;
                node.link_count = links;
                t.add_child(bucket, node);
            }
            "X" => {
                let (Some(name), Some(size)) = (
                    fields.get(1).map(|f| unescape(f)),
                    fields.get(2).and_then(|f| f.parse::<u64>().ok()),
                ) else {
                    skip(line, &mut warnings);
                    continue;
                };
                let Some(top) = stack.last().copied() else {
                    skip(line, &mut warnings);
                    continue;
                };
                let Some(t) = tree.as_mut() else {
                    skip(line, &mut warnings);
                    continue;
                };
                wake_mount(t, top);
                t.add_child(top, Node::excluded(CompactString::new(&name), size));
            }
            "E" => {
                if stack.pop().is_none() {
                    skip(line, &mut warnings);
                }
            }
            _ => skip(line, &mut warnings),
        }
    }

    let Some(mut tree) = tree else {
        return Err(CacheError::NoRoot);
    };

    // A truncated stream leaves directories open on the stack; they are
    // finalized below with whatever children were recovered.
    tree.finalize_subtree(tree.root);
    tree.bump_generation();
    if warnings > 0 {
        warn!("cache load skipped {warnings} malformed record(s)");
    }
    Ok((tree, warnings))
}

/// Read a cache file at `path`.
pub fn read_cache_file(path: &Path) -> Result<(DirectoryTree, u32), CacheError> {
    let file = File::open(path)?;
    read_cache(BufReader::new(file))
}

/// Parse the common `<name> <size> <mtime> <links>` tail of a record.
/// Trailing fields beyond the known ones are ignored.
fn parse_entry(fields: &[&str]) -> Option<(String, u64, Option<SystemTime>, u32)> {
    if fields.len() < 5 {
        return None;
    }
    let name = unescape(fields[1]);
    let size = fields[2].parse::<u64>().ok()?;
    let secs = fields[3]
        .strip_prefix("0x")
        .and_then(|h| u64::from_str_radix(h, 16).ok())?;
    let links = fields[4].parse::<u32>().ok()?;
    let mtime = (secs > 0).then(|| UNIX_EPOCH + Duration::from_secs(secs));
    Some((name, size, mtime, links))
}

fn skip(line: &str, warnings: &mut u32) {
    *warnings += 1;
    warn!("skipping malformed cache record: {line}");
}

/// A child record below an on-request-only mount point means the mount was
/// continued before the snapshot was written.
fn wake_mount(tree: &mut DirectoryTree, index: NodeIndex) {
    let node = tree.node_mut(index);
    if node.kind == NodeKind::MountPoint && node.read_state == ReadState::OnRequestOnly {
        node.read_state = ReadState::Reading;
    }
}

fn mtime_secs(mtime: Option<SystemTime>) -> u64 {
    mtime
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Percent-escape `%`, spaces, and control characters so record fields
/// stay whitespace-delimited.
fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        if ch == '%' || ch == ' ' || ch.is_control() {
            let mut buf = [0u8; 4];
            for byte in ch.encode_utf8(&mut buf).bytes() {
                escaped.push('%');
                escaped.push_str(&format!("{byte:02X}"));
            }
        } else {
            escaped.push(ch);
        }
    }
    escaped
}

fn unescape(text: &str) -> String {
    let mut bytes: Vec<u8> = Vec::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        if ch == '%' {
            let hi = chars.next();
            let lo = chars.next();
            let parsed = match (hi, lo) {
                (Some(h), Some(l)) => u8::from_str_radix(&format!("{h}{l}"), 16).ok(),
                _ => None,
            };
            match parsed {
                Some(byte) => bytes.push(byte),
                None => bytes.push(b'%'),
            }
        } else {
            let mut buf = [0u8; 4];
            bytes.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
        }
    }
    String::from_utf8_lossy(&bytes).into_owned()
}
