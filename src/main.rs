//! spacescout — disk usage analyser.
//!
//! Thin binary entry point. All engine logic lives in the
//! `spacescout-core` crate; this driver scans (or loads a snapshot),
//! prints a largest-first summary, and optionally writes a cache file.

use anyhow::Context;
use clap::{Parser, Subcommand};
use spacescout_core::cache;
use spacescout_core::events::EngineEvent;
use spacescout_core::model::size::{format_count, format_size};
use spacescout_core::model::{DirectoryTree, NodeKind};
use spacescout_core::scan::{start_scan, ScanOptions};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "spacescout", about = "Analyse disk usage of a directory tree")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan a directory tree and print the largest entries.
    Scan {
        /// Directory to scan.
        path: PathBuf,
        /// Enter mount points instead of stopping at filesystem boundaries.
        #[arg(long)]
        cross_filesystems: bool,
        /// Glob pattern to exclude (repeatable).
        #[arg(long = "exclude", value_name = "GLOB")]
        exclude: Vec<String>,
        /// Write a cache snapshot of the scanned tree.
        #[arg(long, value_name = "FILE")]
        write_cache: Option<PathBuf>,
        /// How many entries to list.
        #[arg(long, default_value_t = 10)]
        top: usize,
    },
    /// Load a cache snapshot and print the largest entries.
    Cache {
        /// Snapshot file written by `scan --write-cache`.
        file: PathBuf,
        /// How many entries to list.
        #[arg(long, default_value_t = 10)]
        top: usize,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    match Cli::parse().command {
        Command::Scan {
            path,
            cross_filesystems,
            exclude,
            write_cache,
            top,
        } => run_scan(path, cross_filesystems, exclude, write_cache, top),
        Command::Cache { file, top } => run_cache(file, top),
    }
}

fn run_scan(
    path: PathBuf,
    cross_filesystems: bool,
    exclude: Vec<String>,
    write_cache: Option<PathBuf>,
    top: usize,
) -> anyhow::Result<()> {
    let options = ScanOptions {
        cross_mount_points: cross_filesystems,
        exclude: build_excludes(&exclude)?,
        auto_continue_at_mount: false,
    };

    let handle = start_scan(path, options);
    loop {
        match handle.events_rx.recv_timeout(Duration::from_secs(1)) {
            Ok(EngineEvent::ScanProgress {
                dirs_read,
                entries_seen,
                ..
            }) => {
                tracing::info!("scanned {dirs_read} directories, {entries_seen} entries");
            }
            Ok(EngineEvent::ScanIssue { path, message }) => {
                tracing::warn!("{}: {message}", path.display());
            }
            Ok(EngineEvent::ScanFinished {
                cancelled, errors, ..
            }) => {
                if cancelled {
                    tracing::warn!("scan was cancelled; results are partial");
                }
                if errors > 0 {
                    tracing::warn!("{errors} entries could not be read");
                }
                break;
            }
            Ok(_) => {}
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        }
    }

    let tree = handle.live_tree.read().clone();
    print_summary(&tree, top);

    if let Some(cache_path) = write_cache {
        cache::write_cache_file(&tree, &cache_path)
            .with_context(|| format!("writing cache to {}", cache_path.display()))?;
        println!("\ncache written to {}", cache_path.display());
    }
    Ok(())
}

fn run_cache(file: PathBuf, top: usize) -> anyhow::Result<()> {
    let (tree, warnings) = cache::read_cache_file(&file)
        .with_context(|| format!("reading cache from {}", file.display()))?;
    if warnings > 0 {
        tracing::warn!("{warnings} malformed record(s) were skipped");
    }
    print_summary(&tree, top);
    Ok(())
}

fn build_excludes(patterns: &[String]) -> anyhow::Result<Option<globset::GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = globset::GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(
            globset::Glob::new(pattern)
                .with_context(|| format!("invalid exclude pattern '{pattern}'"))?,
        );
    }
    Ok(Some(builder.build()?))
}

fn print_summary(tree: &DirectoryTree, top: usize) {
    let root = tree.node(tree.root);
    println!(
        "{}  —  {} in {} items{}",
        tree.path.display(),
        format_size(root.total_size),
        format_count(root.total_item_count),
        if root.partial { "  (partial)" } else { "" },
    );

    for child in tree
        .children_sorted_by_size(tree.root)
        .into_iter()
        .take(top)
    {
        let node = tree.node(child);
        let marker = match node.kind {
            NodeKind::Directory => "/",
            NodeKind::MountPoint => " (mount)",
            NodeKind::Excluded => " (excluded)",
            NodeKind::File | NodeKind::DotEntry => "",
        };
        let mtime = node
            .mtime
            .map(|t| {
                chrono::DateTime::<chrono::Local>::from(t)
                    .format("%Y-%m-%d %H:%M")
                    .to_string()
            })
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:>10}  {:>16}  {}{}{}",
            format_size(node.total_size),
            mtime,
            node.name,
            marker,
            if node.partial { " *" } else { "" },
        );
    }

    if root.partial {
        println!("  * aggregate is incomplete (unreadable or aborted entries)");
    }
}
