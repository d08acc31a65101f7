//! Runtime resolution
//!
//! Picks the runtime to start: the slot named by `current`, then the other slot,
//! then the system-wide fallback. Only the last step is considered degraded.

use std::path::PathBuf;

use serde::Serialize;
use tracing::{info, warn};

use crate::errors::AgentError;
use crate::filesys::file::File;
use crate::release::slots::{ReleaseLayout, SlotId};
use crate::utils::now_rfc3339;

/// Why a candidate was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// The slot named by `current`
    Current,
    /// The other slot, because `current` was unusable
    Alternate,
    /// The system runtime, because neither slot was usable
    System,
}

/// A runtime ready to be executed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchTarget {
    pub resolution: Resolution,
    pub slot: Option<SlotId>,
    /// Canonical slot directory; `None` for the system runtime
    pub release_dir: Option<PathBuf>,
    pub runtime: PathBuf,
}

/// Audit record of a degraded launch
#[derive(Debug, Serialize)]
struct AuditEntry<'a> {
    timestamp: String,
    resolution: Resolution,
    runtime: &'a str,
    reason: &'a str,
}

/// Resolve which runtime to start
pub async fn resolve_runtime(
    layout: &ReleaseLayout,
    system_runtime: &File,
) -> Result<LaunchTarget, AgentError> {
    let (preferred, mut reasons) = match layout.resolve_active().await {
        Ok(Some(slot)) => (Some(slot), Vec::new()),
        Ok(None) => (None, vec!["current pointer is missing".to_string()]),
        Err(e) => (None, vec![e.to_string()]),
    };

    let candidates: Vec<(SlotId, Resolution)> = match preferred {
        Some(slot) => vec![(slot, Resolution::Current), (slot.other(), Resolution::Alternate)],
        None => SlotId::ALL.iter().map(|s| (*s, Resolution::Alternate)).collect(),
    };

    for (slot, resolution) in candidates {
        let runtime = layout.runtime(slot);
        if !runtime.is_executable().await {
            reasons.push(format!("{} runtime {} is not executable", slot, runtime.path().display()));
            continue;
        }

        let release_dir = layout.slot_dir(slot).canonicalize().await?;
        let target = LaunchTarget {
            resolution,
            slot: Some(slot),
            runtime: release_dir.join(layout.runtime_entry()),
            release_dir: Some(release_dir),
        };
        if resolution == Resolution::Alternate {
            warn!("Falling back to {}: {}", slot, reasons.join("; "));
        } else {
            info!("Resolved {} as the active release", slot);
        }
        return Ok(target);
    }

    if system_runtime.is_executable().await {
        let reason = reasons.join("; ");
        warn!(
            "No usable release slot, falling back to system runtime {}: {}",
            system_runtime.path().display(),
            reason
        );
        let target = LaunchTarget {
            resolution: Resolution::System,
            slot: None,
            release_dir: None,
            runtime: system_runtime.path().to_path_buf(),
        };
        audit_degraded_launch(layout, &target, &reason).await;
        return Ok(target);
    }

    reasons.push(format!(
        "system runtime {} is not executable",
        system_runtime.path().display()
    ));
    Err(AgentError::NoRuntime(reasons.join("; ")))
}

async fn audit_degraded_launch(layout: &ReleaseLayout, target: &LaunchTarget, reason: &str) {
    let runtime = target.runtime.to_string_lossy();
    let entry = AuditEntry {
        timestamp: now_rfc3339(),
        resolution: target.resolution,
        runtime: &runtime,
        reason,
    };
    let line = match serde_json::to_string(&entry) {
        Ok(line) => line,
        Err(e) => {
            warn!("Unable to encode launcher audit entry: {}", e);
            return;
        }
    };
    if let Err(e) = layout.audit_log().append_line(&line).await {
        warn!("Unable to write launcher audit log: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    fn install_runtime(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "#!/bin/sh\nexit 0\n").unwrap();
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn layout(root: &Path) -> ReleaseLayout {
        ReleaseLayout::new(root, "env/bin/bmtl-agent")
    }

    #[tokio::test]
    async fn test_current_slot_is_preferred() {
        let root = tempfile::tempdir().unwrap();
        let layout = layout(root.path());
        install_runtime(layout.runtime(SlotId::A).path());
        install_runtime(layout.runtime(SlotId::B).path());
        layout.promote(SlotId::B).await.unwrap();

        let target = resolve_runtime(&layout, &File::new("/nonexistent")).await.unwrap();

        assert_eq!(target.resolution, Resolution::Current);
        assert_eq!(target.slot, Some(SlotId::B));
        let canonical = std::fs::canonicalize(root.path().join("slot_b")).unwrap();
        assert_eq!(target.release_dir, Some(canonical.clone()));
        assert_eq!(target.runtime, canonical.join("env/bin/bmtl-agent"));
    }

    #[tokio::test]
    async fn test_dangling_pointer_falls_back_to_other_slot() {
        let root = tempfile::tempdir().unwrap();
        let layout = layout(root.path());
        install_runtime(layout.runtime(SlotId::A).path());
        // slot_b does not exist at all
        layout.promote(SlotId::B).await.unwrap();

        let target = resolve_runtime(&layout, &File::new("/nonexistent")).await.unwrap();

        assert_eq!(target.resolution, Resolution::Alternate);
        assert_eq!(target.slot, Some(SlotId::A));
        assert!(!layout.audit_log().exists().await);
    }

    #[tokio::test]
    async fn test_non_executable_runtime_is_skipped() {
        let root = tempfile::tempdir().unwrap();
        let layout = layout(root.path());
        install_runtime(layout.runtime(SlotId::B).path());
        let runtime_a = layout.runtime(SlotId::A);
        std::fs::create_dir_all(runtime_a.path().parent().unwrap()).unwrap();
        std::fs::write(runtime_a.path(), "not executable").unwrap();
        layout.promote(SlotId::A).await.unwrap();

        let target = resolve_runtime(&layout, &File::new("/nonexistent")).await.unwrap();
        assert_eq!(target.slot, Some(SlotId::B));
    }

    #[tokio::test]
    async fn test_system_runtime_is_last_resort_and_audited() {
        let root = tempfile::tempdir().unwrap();
        let layout = layout(root.path());
        let system = root.path().join("usr/local/bin/bmtl-agent");
        install_runtime(&system);
        layout.promote(SlotId::A).await.unwrap();

        let target = resolve_runtime(&layout, &File::new(&system)).await.unwrap();

        assert_eq!(target.resolution, Resolution::System);
        assert_eq!(target.slot, None);
        assert_eq!(target.runtime, system);

        let audit = std::fs::read_to_string(layout.audit_log().path()).unwrap();
        let entry: serde_json::Value = serde_json::from_str(audit.trim()).unwrap();
        assert_eq!(entry["resolution"], "system");
        assert!(entry["reason"].as_str().unwrap().contains("slot_a"));
    }

    #[tokio::test]
    async fn test_corrupted_pointer_still_launches_a_slot() {
        let root = tempfile::tempdir().unwrap();
        let layout = layout(root.path());
        install_runtime(layout.runtime(SlotId::B).path());
        std::os::unix::fs::symlink("v1", layout.current_link()).unwrap();

        let target = resolve_runtime(&layout, &File::new("/nonexistent")).await.unwrap();
        assert_eq!(target.slot, Some(SlotId::B));
        assert_eq!(target.resolution, Resolution::Alternate);
    }

    #[tokio::test]
    async fn test_nothing_runnable_is_an_error() {
        let root = tempfile::tempdir().unwrap();
        let layout = layout(root.path());

        let err = resolve_runtime(&layout, &File::new(root.path().join("missing")))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::NoRuntime(_)));
    }
}
