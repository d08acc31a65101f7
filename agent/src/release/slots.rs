//! Release slots and the install root layout
//!
//! ```text
//! <install_root>/
//!   slot_a/            release tree + env/ (isolated runtime)
//!   slot_b/
//!   current -> slot_a  the authoritative slot
//!   backup/            snapshot of the previously active slot during an update
//!   .update.lock       held for the duration of an update attempt
//!   launcher-audit.log degraded launches
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::warn;

use crate::errors::AgentError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// One of the two release slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotId {
    A,
    B,
}

impl SlotId {
    pub const ALL: [SlotId; 2] = [SlotId::A, SlotId::B];

    /// Directory name under the install root
    pub fn dir_name(&self) -> &'static str {
        match self {
            SlotId::A => "slot_a",
            SlotId::B => "slot_b",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SlotId::A => "a",
            SlotId::B => "b",
        }
    }

    /// The inactive counterpart
    pub fn other(&self) -> SlotId {
        match self {
            SlotId::A => SlotId::B,
            SlotId::B => SlotId::A,
        }
    }

    /// Strict mapping from a directory name; anything else is not a slot
    pub fn from_dir_name(name: &str) -> Option<SlotId> {
        match name {
            "slot_a" => Some(SlotId::A),
            "slot_b" => Some(SlotId::B),
            _ => None,
        }
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Marker written into a slot once it passed provisioning and validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotManifest {
    pub slot: SlotId,
    pub build_hash: String,
    pub validated_at: String,
}

/// Observed state of a slot
#[derive(Debug, Clone, Serialize)]
pub struct ReleaseSlot {
    pub slot_id: SlotId,
    pub path: PathBuf,
    pub env_path: PathBuf,
    pub runtime_entry: PathBuf,
    pub runtime_executable: bool,
    pub build_hash: Option<String>,
    pub validated_at: Option<String>,
}

pub const MANIFEST_FILE: &str = ".release.json";

/// Paths under the install root
#[derive(Debug, Clone)]
pub struct ReleaseLayout {
    root: PathBuf,
    runtime_entry: PathBuf,
}

impl ReleaseLayout {
    pub fn new(root: impl Into<PathBuf>, runtime_entry: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            runtime_entry: runtime_entry.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn slot_dir(&self, slot: SlotId) -> Dir {
        Dir::new(self.root.join(slot.dir_name()))
    }

    /// Isolated runtime environment inside a slot
    pub fn env_dir(&self, slot: SlotId) -> Dir {
        self.slot_dir(slot).subdir("env")
    }

    /// Runtime entry point inside a slot
    pub fn runtime(&self, slot: SlotId) -> File {
        File::new(self.slot_dir(slot).path().join(&self.runtime_entry))
    }

    pub fn runtime_entry(&self) -> &Path {
        &self.runtime_entry
    }

    pub fn manifest_file(&self, slot: SlotId) -> File {
        self.slot_dir(slot).file(MANIFEST_FILE)
    }

    pub fn current_link(&self) -> PathBuf {
        self.root.join("current")
    }

    pub fn backup_dir(&self) -> Dir {
        Dir::new(self.root.join("backup"))
    }

    pub fn lock_file(&self) -> PathBuf {
        self.root.join(".update.lock")
    }

    pub fn audit_log(&self) -> File {
        File::new(self.root.join("launcher-audit.log"))
    }

    /// Read a slot's manifest; a missing or unreadable marker means "not validated"
    pub async fn read_manifest(&self, slot: SlotId) -> Option<SlotManifest> {
        let file = self.manifest_file(slot);
        if !file.exists().await {
            return None;
        }
        match file.read_json::<SlotManifest>().await {
            Ok(manifest) if manifest.slot == slot => Some(manifest),
            Ok(manifest) => {
                warn!("Manifest in {} claims slot {}, ignoring", slot, manifest.slot);
                None
            }
            Err(e) => {
                warn!("Unreadable manifest in {}: {}", slot, e);
                None
            }
        }
    }

    pub async fn write_manifest(&self, manifest: &SlotManifest) -> Result<(), AgentError> {
        self.manifest_file(manifest.slot).write_json(manifest).await
    }

    pub async fn remove_manifest(&self, slot: SlotId) -> Result<(), AgentError> {
        self.manifest_file(slot).delete().await
    }

    /// Snapshot of a slot for status reporting
    pub async fn describe(&self, slot: SlotId) -> ReleaseSlot {
        let manifest = self.read_manifest(slot).await;
        ReleaseSlot {
            slot_id: slot,
            path: self.slot_dir(slot).path().to_path_buf(),
            env_path: self.env_dir(slot).path().to_path_buf(),
            runtime_entry: self.runtime(slot).path().to_path_buf(),
            runtime_executable: self.runtime(slot).is_executable().await,
            build_hash: manifest.as_ref().map(|m| m.build_hash.clone()),
            validated_at: manifest.map(|m| m.validated_at),
        }
    }
}

/// Identify the build in a release tree: git HEAD, then a VERSION file, then "unknown"
pub async fn build_hash(dir: &Path) -> String {
    let git = Command::new("git")
        .current_dir(dir)
        .args(["rev-parse", "--short=12", "HEAD"])
        .output()
        .await;
    if let Ok(output) = git {
        let hash = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if output.status.success() && !hash.is_empty() {
            return hash;
        }
    }

    if let Ok(version) = File::new(dir.join("VERSION")).read_string().await {
        let version = version.trim();
        if !version.is_empty() {
            return version.to_string();
        }
    }

    "unknown".to_string()
}
