//! Release source checkout

use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::{debug, info};

use crate::errors::AgentError;

/// Pull the latest commits of `branch` into the source checkout.
///
/// A source directory that is not a git checkout is used as-is.
pub async fn refresh_source(source_dir: &Path, branch: &str) -> Result<(), AgentError> {
    if !source_dir.join(".git").exists() {
        debug!("{} is not a git checkout, skipping pull", source_dir.display());
        return Ok(());
    }

    info!("Pulling {} in {}", branch, source_dir.display());
    let output = Command::new("git")
        .current_dir(source_dir)
        .args(["pull", "--ff-only", "origin", branch])
        .output()
        .await
        .map_err(|e| AgentError::SyncError(format!("Failed to run git pull: {e}")))?;

    if !output.status.success() {
        return Err(AgentError::SyncError(format!(
            "git pull failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

/// Refuse to mirror a tree into itself or into one of its own descendants.
///
/// Both paths must exist; they are compared after resolving symlinks.
pub async fn guard_collision(source: &Path, target: &Path) -> Result<(PathBuf, PathBuf), AgentError> {
    let canonical_source = tokio::fs::canonicalize(source).await.map_err(|e| {
        AgentError::ReleaseError(format!("release source {} unavailable: {e}", source.display()))
    })?;
    let canonical_target = tokio::fs::canonicalize(target).await?;

    if canonical_source == canonical_target
        || canonical_target.starts_with(&canonical_source)
        || canonical_source.starts_with(&canonical_target)
    {
        return Err(AgentError::PathCollision(format!(
            "source {} and target {} overlap",
            canonical_source.display(),
            canonical_target.display()
        )));
    }
    Ok((canonical_source, canonical_target))
}
