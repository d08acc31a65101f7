//! Storage layout configuration

use std::path::PathBuf;

use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Storage layout for the agent's configuration directory
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Agent settings (broker, release, hardware)
    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Device profile (site name, camera power)
    pub fn device_file(&self) -> File {
        File::new(self.base_dir.join("device.json"))
    }

    /// Persisted capture settings
    pub fn capture_settings_file(&self) -> File {
        File::new(self.base_dir.join("capture_settings.json"))
    }

    /// Get the base directory
    pub fn base(&self) -> Dir {
        Dir::new(self.base_dir.clone())
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), crate::errors::AgentError> {
        self.base().create().await
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        Self::new("/etc/bmtl-device")
    }
}
