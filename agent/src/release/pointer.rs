//! The `current` pointer
//!
//! `current` is a symlink whose target names exactly one slot directory. It is
//! only ever replaced by renaming a freshly created symlink over it, so readers
//! observe either the old slot or the new one and never a missing pointer.

use std::io;
use std::path::Path;

use tokio::fs;
use tracing::info;

use crate::errors::AgentError;
use crate::release::slots::{ReleaseLayout, SlotId};

impl ReleaseLayout {
    /// Resolve the active slot.
    ///
    /// `Ok(None)` means no pointer exists yet (fresh device). A pointer that exists
    /// but does not name `slot_a` or `slot_b` is corruption and is never defaulted.
    pub async fn resolve_active(&self) -> Result<Option<SlotId>, AgentError> {
        let link = self.current_link();
        let meta = match fs::symlink_metadata(&link).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if !meta.file_type().is_symlink() {
            return Err(AgentError::SlotCorruption(format!(
                "{} exists but is not a symlink",
                link.display()
            )));
        }

        let target = fs::read_link(&link).await?;
        slot_from_target(self.root(), &target).ok_or_else(|| {
            AgentError::SlotCorruption(format!(
                "{} points at {}, which is not a release slot",
                link.display(),
                target.display()
            ))
        })
        .map(Some)
    }

    /// Atomically repoint `current` at `slot`
    pub async fn promote(&self, slot: SlotId) -> Result<(), AgentError> {
        let link = self.current_link();
        let temp_link = self
            .root()
            .join(format!(".current.{}.tmp", uuid::Uuid::new_v4()));

        fs::symlink(slot.dir_name(), &temp_link).await?;
        if let Err(e) = fs::rename(&temp_link, &link).await {
            let _ = fs::remove_file(&temp_link).await;
            return Err(AgentError::ReleaseError(format!(
                "failed to repoint {} to {}: {}",
                link.display(),
                slot,
                e
            )));
        }

        info!("current -> {}", slot);
        Ok(())
    }

    /// Remove the pointer entirely (failed first install)
    pub async fn clear_pointer(&self) -> Result<(), AgentError> {
        match fs::remove_file(self.current_link()).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Accept `slot_x` or `<install_root>/slot_x`, nothing else
fn slot_from_target(root: &Path, target: &Path) -> Option<SlotId> {
    let name = target.file_name()?.to_str()?;
    let slot = SlotId::from_dir_name(name)?;

    match target.parent() {
        Some(parent) if parent.as_os_str().is_empty() => Some(slot),
        Some(parent) if parent == root => Some(slot),
        None => Some(slot),
        _ => None,
    }
}
