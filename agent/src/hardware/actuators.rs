//! Hardware actuation through configured commands

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::errors::AgentError;
use crate::shell::run_shell;
use crate::storage::device::CameraPower;
use crate::storage::settings::HardwareSettings;

/// Physical side effects the dispatcher can request
#[async_trait]
pub trait Actuators: Send + Sync {
    /// Switch camera power
    async fn set_camera_power(&self, state: CameraPower) -> Result<(), AgentError>;

    /// Run one wiper cycle, returning once it completed
    async fn run_wiper(&self) -> Result<(), AgentError>;

    /// Reboot the host
    async fn reboot(&self) -> Result<(), AgentError>;

    /// Supported camera option ranges
    fn camera_options(&self) -> Map<String, Value>;
}

/// Runs the shell commands configured under `hardware`
pub struct CommandActuators {
    settings: HardwareSettings,
}

impl CommandActuators {
    pub fn new(settings: HardwareSettings) -> Self {
        Self { settings }
    }

    async fn run(&self, action: &str, command: &str) -> Result<(), AgentError> {
        if command.trim().is_empty() {
            debug!("No command configured for {}, nothing to actuate", action);
            return Ok(());
        }

        info!("Running {} command: {}", action, command);
        let output = run_shell(command, None, &[]).await?;
        if !output.success {
            return Err(AgentError::HardwareError(format!("{action} failed: {}", output.summary())));
        }
        Ok(())
    }
}

#[async_trait]
impl Actuators for CommandActuators {
    async fn set_camera_power(&self, state: CameraPower) -> Result<(), AgentError> {
        let command = match state {
            CameraPower::On => &self.settings.camera_on_cmd,
            CameraPower::Off => &self.settings.camera_off_cmd,
        };
        self.run("camera power", command).await
    }

    async fn run_wiper(&self) -> Result<(), AgentError> {
        self.run("wiper", &self.settings.wiper_cmd).await
    }

    async fn reboot(&self) -> Result<(), AgentError> {
        self.run("reboot", &self.settings.reboot_cmd).await
    }

    fn camera_options(&self) -> Map<String, Value> {
        let options = json!({
            "supported_resolutions": ["1920x1080", "1280x720", "5184x3456"],
            "iso_range": [100, 200, 400, 800, 1600, 3200, 6400],
            "aperture_range": ["f/1.4", "f/2.8", "f/4", "f/5.6", "f/8", "f/11", "f/16"],
            "shutter_speed_range": ["1/4000", "1/2000", "1/1000", "1/500", "1/250", "1/125", "1/60", "1/30"],
            "white_balance_options": ["Auto", "Daylight", "Shade", "Cloudy", "Tungsten", "Fluorescent"],
            "supported_formats": ["jpeg", "raw"],
            "capture_interval_range": [1, 1440],
            "quality_range": [1, 100]
        });
        match options {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }
}
