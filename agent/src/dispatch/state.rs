//! Device state owned by the dispatch loop

use crate::storage::capture::{CaptureSettings, CaptureStats};
use crate::storage::device::{CameraPower, DeviceIdentity, DeviceProfile};
use crate::telemetry::{boot_time, Telemetry, DEFAULT_TEMPERATURE};
use crate::utils::now_rfc3339;

/// Everything the heartbeat and the handlers read about the device.
///
/// Owned by the MQTT worker task; handlers receive it by `&mut`.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceState {
    pub identity: DeviceIdentity,
    pub site_name: String,
    pub camera_power: CameraPower,
    pub schedule: CaptureSettings,
    pub capture: CaptureStats,
    pub telemetry: Telemetry,
    /// Build hash captured once at process start
    pub build_hash: String,
    pub last_boot_time: String,
}

impl DeviceState {
    pub fn new(
        identity: DeviceIdentity,
        profile: DeviceProfile,
        schedule: CaptureSettings,
        build_hash: String,
    ) -> Self {
        Self {
            identity,
            site_name: profile.site_name,
            camera_power: profile.camera_power,
            schedule,
            capture: CaptureStats::default(),
            telemetry: Telemetry {
                storage_used: 0.0,
                temperature: DEFAULT_TEMPERATURE,
                uptime_secs: 0,
            },
            build_hash,
            last_boot_time: now_rfc3339(),
        }
    }

    pub fn apply_telemetry(&mut self, telemetry: Telemetry) {
        if telemetry.uptime_secs > 0 {
            self.last_boot_time = boot_time(telemetry.uptime_secs);
        }
        self.telemetry = telemetry;
    }

    pub fn apply_capture_stats(&mut self, stats: CaptureStats) {
        self.capture = stats;
    }

    pub fn profile(&self) -> DeviceProfile {
        DeviceProfile {
            site_name: self.site_name.clone(),
            camera_power: self.camera_power,
        }
    }
}
