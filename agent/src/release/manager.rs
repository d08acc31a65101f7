//! Release manager
//!
//! Installs a new build into the inactive slot, validates it there, and only then
//! repoints `current` at it. Everything up to promotion can be abandoned on
//! shutdown; after promotion a failed health check is answered with a rollback.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::str::FromStr;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::errors::AgentError;
use crate::filesys::mirror::mirror_tree;
use crate::release::lock::{is_locked, UpdateLockGuard};
use crate::release::services::{verify_health, ServiceControl};
use crate::release::slots::{build_hash, ReleaseLayout, ReleaseSlot, SlotId, SlotManifest};
use crate::release::source::{guard_collision, refresh_source};
use crate::shell::run_shell;
use crate::storage::settings::ReleaseSettings;
use crate::utils::now_rfc3339;

/// What a release manager invocation should do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateMode {
    /// First install, or reinstall without taking a backup
    Install,
    /// Replace the running release; backed up and rolled back on failure
    Update,
    /// Switch back to the other, already validated slot
    Revert,
}

impl UpdateMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateMode::Install => "install",
            UpdateMode::Update => "update",
            UpdateMode::Revert => "revert",
        }
    }
}

impl fmt::Display for UpdateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UpdateMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "install" => Ok(UpdateMode::Install),
            "update" => Ok(UpdateMode::Update),
            "revert" => Ok(UpdateMode::Revert),
            _ => Err(format!("Invalid update mode: {}", s)),
        }
    }
}

/// Release manager options
#[derive(Debug, Clone)]
pub struct Options {
    pub layout: ReleaseLayout,
    pub source_dir: PathBuf,
    pub source_branch: Option<String>,
    pub sync_excludes: Vec<String>,
    pub provision_cmd: String,
    pub validate_cmd: String,
}

impl From<&ReleaseSettings> for Options {
    fn from(settings: &ReleaseSettings) -> Self {
        Self {
            layout: ReleaseLayout::new(settings.install_root(), &settings.runtime_entry),
            source_dir: settings.source_dir(),
            source_branch: settings.source_branch.clone(),
            sync_excludes: settings.sync_excludes.clone(),
            provision_cmd: settings.provision_cmd.clone(),
            validate_cmd: settings.validate_cmd.clone(),
        }
    }
}

/// Outcome of a successful run
#[derive(Debug, Clone, Serialize)]
pub struct ReleaseReport {
    pub mode: UpdateMode,
    pub previous: Option<SlotId>,
    pub active: SlotId,
    pub build_hash: String,
}

/// Blue/green release manager
pub struct ReleaseManager<S: ServiceControl> {
    options: Options,
    services: S,
}

impl<S: ServiceControl> ReleaseManager<S> {
    pub fn new(options: Options, services: S) -> Self {
        Self { options, services }
    }

    pub fn layout(&self) -> &ReleaseLayout {
        &self.options.layout
    }

    pub fn services(&self) -> &S {
        &self.services
    }

    /// Run one attempt while holding the update lock
    pub async fn run(
        &self,
        mode: UpdateMode,
        shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
    ) -> Result<ReleaseReport, AgentError> {
        let layout = self.layout();
        tokio::fs::create_dir_all(layout.root()).await?;
        let _lock = UpdateLockGuard::acquire(&layout.lock_file())?;

        info!("Release manager starting ({})", mode);
        let result = match mode {
            UpdateMode::Revert => self.revert().await,
            UpdateMode::Install | UpdateMode::Update => self.update(mode, shutdown_signal).await,
        };

        match &result {
            Ok(report) => info!(
                "Release {} complete: {} is active with build {}",
                mode, report.active, report.build_hash
            ),
            Err(e) => error!("Release {} failed: {}", mode, e),
        }
        result
    }

    async fn update(
        &self,
        mode: UpdateMode,
        shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
    ) -> Result<ReleaseReport, AgentError> {
        let active = self.layout().resolve_active().await?;
        if mode == UpdateMode::Update && active.is_none() {
            return Err(AgentError::ReleaseError(
                "no current release to update, run --install first".to_string(),
            ));
        }
        let target = active.map(|slot| slot.other()).unwrap_or(SlotId::A);
        info!(
            "Preparing {} (active: {})",
            target,
            active.map(|s| s.to_string()).unwrap_or_else(|| "none".to_string())
        );

        // the only cancellation point: nothing visible has changed yet
        let build_hash = tokio::select! {
            result = self.prepare(target) => result?,
            _ = shutdown_signal => {
                warn!("Shutdown requested, abandoning update before promotion");
                return Err(AgentError::Cancelled(format!(
                    "preparation of {target} abandoned"
                )));
            }
        };

        self.promote_and_verify(mode, active, target, build_hash).await
    }

    /// Sync, provision and validate the target slot. Leaves the pointer untouched.
    async fn prepare(&self, target: SlotId) -> Result<String, AgentError> {
        let layout = self.layout();

        if let Some(branch) = &self.options.source_branch {
            refresh_source(&self.options.source_dir, branch).await?;
        }

        let target_dir = layout.slot_dir(target);
        target_dir.create().await?;
        let (source, target_path) = guard_collision(&self.options.source_dir, target_dir.path()).await?;

        layout.remove_manifest(target).await?;
        mirror_tree(&source, &target_path, &self.options.sync_excludes).await?;
        let build_hash = build_hash(&source).await;

        self.provision(target, &target_path, &build_hash).await?;
        self.validate(target, &target_path, &build_hash).await?;

        layout
            .write_manifest(&SlotManifest {
                slot: target,
                build_hash: build_hash.clone(),
                validated_at: now_rfc3339(),
            })
            .await?;
        info!("{} validated with build {}", target, build_hash);
        Ok(build_hash)
    }

    async fn provision(&self, slot: SlotId, slot_path: &Path, build_hash: &str) -> Result<(), AgentError> {
        if self.options.provision_cmd.is_empty() {
            return Ok(());
        }
        info!("Provisioning {}: {}", slot, self.options.provision_cmd);
        let output = run_shell(
            &self.options.provision_cmd,
            Some(slot_path),
            &slot_env(slot, slot_path, build_hash),
        )
        .await
        .map_err(|e| AgentError::ProvisionError(e.to_string()))?;

        if !output.success {
            return Err(AgentError::ProvisionError(format!("{}: {}", slot, output.summary())));
        }
        Ok(())
    }

    async fn validate(&self, slot: SlotId, slot_path: &Path, build_hash: &str) -> Result<(), AgentError> {
        let runtime = self.layout().runtime(slot);
        if !runtime.is_executable().await {
            return Err(AgentError::SlotValidationError(format!(
                "runtime {} is missing or not executable",
                runtime.path().display()
            )));
        }

        if self.options.validate_cmd.is_empty() {
            return Ok(());
        }
        info!("Validating {}: {}", slot, self.options.validate_cmd);
        let output = run_shell(
            &self.options.validate_cmd,
            Some(slot_path),
            &slot_env(slot, slot_path, build_hash),
        )
        .await
        .map_err(|e| AgentError::SlotValidationError(e.to_string()))?;

        if !output.success {
            return Err(AgentError::SlotValidationError(format!(
                "{}: {}",
                slot,
                output.summary()
            )));
        }
        Ok(())
    }

    async fn promote_and_verify(
        &self,
        mode: UpdateMode,
        active: Option<SlotId>,
        target: SlotId,
        build_hash: String,
    ) -> Result<ReleaseReport, AgentError> {
        let layout = self.layout();
        let backed_up = match (mode, active) {
            (UpdateMode::Update, Some(previous)) => {
                self.snapshot(previous).await?;
                Some(previous)
            }
            _ => None,
        };

        if let Err(e) = self.services.stop().await {
            warn!("Unable to stop services, keeping the current release: {}", e);
            self.restart_services().await;
            return Err(e);
        }

        if let Err(e) = layout.promote(target).await {
            self.restart_services().await;
            return Err(e);
        }

        let verified = match self.services.start().await {
            Ok(()) => verify_health(&self.services, Some(&build_hash)).await,
            Err(e) => Err(e),
        };

        if let Err(e) = verified {
            error!("{} failed verification after promotion: {}", target, e);
            if let Err(unmark_err) = layout.remove_manifest(target).await {
                warn!("Failed to unmark {}: {}", target, unmark_err);
            }
            match (backed_up, active) {
                (Some(previous), _) => {
                    if let Err(rollback_err) = self.rollback(previous).await {
                        error!(
                            "Rollback to {} failed, manual repair required: {}",
                            previous, rollback_err
                        );
                    }
                }
                (None, Some(previous)) => {
                    warn!("Repointing to {} without a backup", previous);
                    if let Err(repoint_err) = layout.promote(previous).await {
                        error!("Failed to repoint to {}: {}", previous, repoint_err);
                    }
                    self.restart_services().await;
                }
                (None, None) => {
                    warn!("No previous release, removing the current pointer");
                    if let Err(clear_err) = layout.clear_pointer().await {
                        error!("Failed to remove the current pointer: {}", clear_err);
                    }
                    self.restart_services().await;
                }
            }
            return Err(e);
        }

        if backed_up.is_some() {
            if let Err(e) = layout.backup_dir().delete().await {
                warn!("Failed to delete backup: {}", e);
            }
        }

        Ok(ReleaseReport {
            mode,
            previous: active,
            active: target,
            build_hash,
        })
    }

    /// Copy the active slot into the backup directory
    async fn snapshot(&self, slot: SlotId) -> Result<(), AgentError> {
        let layout = self.layout();
        info!("Backing up {}", slot);
        mirror_tree(layout.slot_dir(slot).path(), layout.backup_dir().path(), &[]).await?;
        Ok(())
    }

    /// Restore the backup into `previous`, point back at it and bring services up
    pub async fn rollback(&self, previous: SlotId) -> Result<(), AgentError> {
        let layout = self.layout();
        warn!("Rolling back to {}", previous);

        if let Err(e) = self.services.stop().await {
            warn!("Unable to stop services before rollback: {}", e);
        }

        // Updates never write to the previous slot; point back at it even if the restore fails
        let backup = layout.backup_dir();
        let restored = if backup.exists().await {
            mirror_tree(backup.path(), layout.slot_dir(previous).path(), &[])
                .await
                .map(|_| ())
        } else {
            Err(AgentError::ReleaseError(format!(
                "backup {} is missing",
                backup.path().display()
            )))
        };
        if let Err(e) = &restored {
            error!("Unable to restore {} from backup, pointing back at it as is: {}", previous, e);
        }
        layout.promote(previous).await?;

        self.services.start().await?;
        let expected = layout.read_manifest(previous).await.map(|m| m.build_hash);
        verify_health(&self.services, expected.as_deref()).await?;

        // Keep the backup around for manual repair
        restored?;
        backup.delete().await?;
        info!("Rollback to {} complete", previous);
        Ok(())
    }

    /// Switch to the other slot if it holds a validated release
    async fn revert(&self) -> Result<ReleaseReport, AgentError> {
        let layout = self.layout();
        let active = layout.resolve_active().await?.ok_or_else(|| {
            AgentError::ReleaseError("no current release to revert from".to_string())
        })?;
        let candidate = active.other();

        let manifest = layout.read_manifest(candidate).await.ok_or_else(|| {
            AgentError::ReleaseError(format!("{candidate} holds no validated release"))
        })?;
        if !layout.runtime(candidate).is_executable().await {
            return Err(AgentError::SlotValidationError(format!(
                "{candidate} runtime is missing or not executable"
            )));
        }

        info!("Reverting {} -> {} (build {})", active, candidate, manifest.build_hash);
        if let Err(e) = self.services.stop().await {
            warn!("Unable to stop services before revert: {}", e);
        }
        layout.promote(candidate).await?;

        let verified = match self.services.start().await {
            Ok(()) => verify_health(&self.services, Some(&manifest.build_hash)).await,
            Err(e) => Err(e),
        };
        if let Err(e) = verified {
            error!("{} failed verification, switching back to {}: {}", candidate, active, e);
            if let Err(unmark_err) = layout.remove_manifest(candidate).await {
                warn!("Failed to unmark {}: {}", candidate, unmark_err);
            }
            if let Err(repoint_err) = layout.promote(active).await {
                error!("Failed to switch back to {}: {}", active, repoint_err);
            }
            self.restart_services().await;
            return Err(e);
        }

        Ok(ReleaseReport {
            mode: UpdateMode::Revert,
            previous: Some(active),
            active: candidate,
            build_hash: manifest.build_hash,
        })
    }

    async fn restart_services(&self) {
        if let Err(e) = self.services.stop().await {
            warn!("Unable to stop services: {}", e);
        }
        if let Err(e) = self.services.start().await {
            error!("Unable to start services: {}", e);
        }
    }
}

fn slot_env<'a>(slot: SlotId, slot_path: &'a Path, build_hash: &'a str) -> Vec<(&'static str, &'a str)> {
    vec![
        ("BMTL_RELEASE_DIR", slot_path.to_str().unwrap_or_default()),
        ("BMTL_SLOT", slot.label()),
        ("BMTL_BUILD_HASH", build_hash),
    ]
}

/// Release layout summary for `--status`
#[derive(Debug, Clone, Serialize)]
pub struct ReleaseStatus {
    pub install_root: PathBuf,
    pub active: Option<SlotId>,
    pub pointer_error: Option<String>,
    pub update_in_progress: bool,
    pub backup_present: bool,
    pub slots: Vec<ReleaseSlot>,
}

pub async fn release_status(layout: &ReleaseLayout) -> ReleaseStatus {
    let (active, pointer_error) = match layout.resolve_active().await {
        Ok(active) => (active, None),
        Err(e) => (None, Some(e.to_string())),
    };

    let mut slots = Vec::with_capacity(SlotId::ALL.len());
    for slot in SlotId::ALL {
        slots.push(layout.describe(slot).await);
    }

    ReleaseStatus {
        install_root: layout.root().to_path_buf(),
        active,
        pointer_error,
        update_in_progress: is_locked(&layout.lock_file()),
        backup_present: layout.backup_dir().exists().await,
        slots,
    }
}
