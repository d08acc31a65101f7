//! Directory tree mirroring
//!
//! Makes a target directory an exact copy of a source directory: new and changed
//! files are copied, entries missing from the source are deleted, and excluded
//! relative paths are left alone on both sides. Files are compared by size first
//! and by SHA-256 digest when sizes match, so repeated mirrors only touch what
//! actually changed.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::errors::AgentError;

/// Counters reported by a mirror pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MirrorStats {
    pub copied: usize,
    pub unchanged: usize,
    pub removed: usize,
}

/// Mirror `source` into `target` on a blocking thread
pub async fn mirror_tree(
    source: &Path,
    target: &Path,
    excludes: &[String],
) -> Result<MirrorStats, AgentError> {
    let source = source.to_path_buf();
    let target = target.to_path_buf();
    let excludes: Vec<PathBuf> = excludes.iter().map(PathBuf::from).collect();

    tokio::task::spawn_blocking(move || mirror_tree_blocking(&source, &target, &excludes))
        .await
        .map_err(|e| AgentError::SyncError(format!("mirror task failed: {e}")))?
}

/// Mirror `source` into `target`, replacing content and deleting extras
pub fn mirror_tree_blocking(
    source: &Path,
    target: &Path,
    excludes: &[PathBuf],
) -> Result<MirrorStats, AgentError> {
    if !source.is_dir() {
        return Err(AgentError::SyncError(format!(
            "mirror source {} is not a directory",
            source.display()
        )));
    }
    fs::create_dir_all(target)?;

    let mut stats = MirrorStats::default();
    prune_target(source, target, excludes, &mut stats)?;
    copy_source(source, target, excludes, &mut stats)?;

    info!(
        source = %source.display(),
        target = %target.display(),
        copied = stats.copied,
        unchanged = stats.unchanged,
        removed = stats.removed,
        "mirror complete"
    );
    Ok(stats)
}

fn is_excluded(rel: &Path, excludes: &[PathBuf]) -> bool {
    excludes.iter().any(|ex| rel.starts_with(ex))
}

fn relative<'a>(root: &Path, path: &'a Path) -> Result<&'a Path, AgentError> {
    path.strip_prefix(root)
        .map_err(|e| AgentError::SyncError(format!("{}: {e}", path.display())))
}

/// Remove target entries that are gone from the source or changed kind
fn prune_target(
    source: &Path,
    target: &Path,
    excludes: &[PathBuf],
    stats: &mut MirrorStats,
) -> Result<(), AgentError> {
    let mut entries = WalkDir::new(target)
        .min_depth(1)
        .into_iter()
        .filter_entry(|entry| {
            entry
                .path()
                .strip_prefix(target)
                .map(|rel| !is_excluded(rel, excludes))
                .unwrap_or(true)
        });

    while let Some(entry) = entries.next() {
        let entry = entry?;
        let rel = relative(target, entry.path())?;
        let counterpart = source.join(rel);

        let keep = match fs::symlink_metadata(&counterpart) {
            Ok(meta) => {
                let theirs = meta.file_type();
                let ours = entry.file_type();
                theirs.is_dir() == ours.is_dir() && theirs.is_symlink() == ours.is_symlink()
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };
        if keep {
            continue;
        }

        debug!(path = %entry.path().display(), "removing stale entry");
        if entry.file_type().is_dir() {
            fs::remove_dir_all(entry.path())?;
            entries.skip_current_dir();
        } else {
            fs::remove_file(entry.path())?;
        }
        stats.removed += 1;
    }
    Ok(())
}

/// Copy new and changed entries from source into target
fn copy_source(
    source: &Path,
    target: &Path,
    excludes: &[PathBuf],
    stats: &mut MirrorStats,
) -> Result<(), AgentError> {
    let entries = WalkDir::new(source)
        .min_depth(1)
        .into_iter()
        .filter_entry(|entry| {
            entry
                .path()
                .strip_prefix(source)
                .map(|rel| !is_excluded(rel, excludes))
                .unwrap_or(true)
        });

    for entry in entries {
        let entry = entry?;
        let rel = relative(source, entry.path())?;
        let dest = target.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&dest)?;
            continue;
        }

        if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            match fs::read_link(&dest) {
                Ok(existing) if existing == link => {
                    stats.unchanged += 1;
                    continue;
                }
                Ok(_) => fs::remove_file(&dest)?,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            std::os::unix::fs::symlink(&link, &dest)?;
            stats.copied += 1;
            continue;
        }

        if same_contents(entry.path(), &dest)? {
            stats.unchanged += 1;
            continue;
        }
        fs::copy(entry.path(), &dest)?;
        stats.copied += 1;
    }
    Ok(())
}

fn same_contents(a: &Path, b: &Path) -> Result<bool, AgentError> {
    let meta_b = match fs::metadata(b) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    let meta_a = fs::metadata(a)?;
    if meta_a.len() != meta_b.len() {
        return Ok(false);
    }
    if meta_a.permissions() != meta_b.permissions() {
        return Ok(false);
    }
    Ok(file_digest(a)? == file_digest(b)?)
}

/// SHA-256 of a file, streamed
pub fn file_digest(path: &Path) -> Result<Vec<u8>, AgentError> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize().to_vec())
}
