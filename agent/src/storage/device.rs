//! Device identity and profile management

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::AgentError;
use crate::filesys::file::File;
use crate::storage::settings::DeviceSettings;

/// Camera power state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraPower {
    On,
    #[default]
    Off,
}

impl CameraPower {
    pub fn toggled(self) -> Self {
        match self {
            CameraPower::On => CameraPower::Off,
            CameraPower::Off => CameraPower::On,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CameraPower::On => "on",
            CameraPower::Off => "off",
        }
    }
}

/// Locally persisted device profile
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceProfile {
    /// Display name of the installation site
    #[serde(default)]
    pub site_name: String,

    /// Last commanded camera power state
    #[serde(default)]
    pub camera_power: CameraPower,
}

/// Load the device profile, falling back to defaults when the file is missing
pub async fn load_profile(device_file: &File) -> Result<DeviceProfile, AgentError> {
    if !device_file.exists().await {
        return Ok(DeviceProfile::default());
    }
    device_file.read_json().await
}

/// Save the device profile atomically
pub async fn save_profile(device_file: &File, profile: &DeviceProfile) -> Result<(), AgentError> {
    device_file.write_json(profile).await
}

/// Canonical device identity: a two-digit numeric id plus the wire module id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub device_id: String,
    pub module_id: String,
}

impl DeviceIdentity {
    /// Resolve from settings, then from the hostname, then the default `01`
    pub fn resolve(settings: &DeviceSettings, hostname: &str) -> Self {
        let device_id = settings
            .id
            .as_deref()
            .and_then(|id| {
                let normalized = normalize_id(id);
                if normalized.is_none() {
                    warn!("Ignoring non-numeric device id in settings: {}", id);
                }
                normalized
            })
            .or_else(|| id_from_hostname(hostname, &settings.module_prefix))
            .unwrap_or_else(|| "01".to_string());

        Self {
            module_id: format!("{}{}", settings.module_prefix, device_id),
            device_id,
        }
    }
}

fn normalize_id(raw: &str) -> Option<String> {
    let digits = raw.trim();
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(format!("{:0>2}", digits))
}

/// Extract the digits following the module prefix in a hostname like `bmotion07`
fn id_from_hostname(hostname: &str, prefix: &str) -> Option<String> {
    let lower = hostname.to_lowercase();
    let prefix = prefix.to_lowercase();
    let start = lower.find(&prefix)? + prefix.len();
    let digits: String = lower[start..].chars().take_while(|c| c.is_ascii_digit()).collect();
    normalize_id(&digits)
}
