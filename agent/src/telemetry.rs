//! Telemetry collection

use std::path::{Path, PathBuf};

use chrono::{Duration as ChronoDuration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sysinfo::{Disks, System};
use tracing::debug;

/// Temperature reported when no sensor is readable
pub const DEFAULT_TEMPERATURE: f64 = 25.0;

/// Where to sense from
#[derive(Debug, Clone)]
pub struct TelemetryOptions {
    /// Path whose filesystem usage is reported
    pub storage_path: PathBuf,

    /// Kernel thermal zone reporting millidegrees Celsius
    pub thermal_zone: PathBuf,
}

impl Default for TelemetryOptions {
    fn default() -> Self {
        Self {
            storage_path: PathBuf::from("/"),
            thermal_zone: PathBuf::from("/sys/class/thermal/thermal_zone0/temp"),
        }
    }
}

/// Sensed device metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    /// Storage usage percentage (0-100)
    pub storage_used: f64,

    /// SoC temperature in degrees Celsius
    pub temperature: f64,

    /// System uptime in seconds
    pub uptime_secs: u64,
}

/// Collect telemetry. Blocking, run it off the async executor.
pub fn collect_telemetry(options: &TelemetryOptions) -> Telemetry {
    let disks = Disks::new_with_refreshed_list();
    let usage = disks
        .iter()
        .map(|disk| (disk.mount_point().to_path_buf(), disk.total_space(), disk.available_space()))
        .collect::<Vec<_>>();

    Telemetry {
        storage_used: storage_used_percent(&usage, &options.storage_path),
        temperature: read_temperature(&options.thermal_zone).unwrap_or(DEFAULT_TEMPERATURE),
        uptime_secs: System::uptime(),
    }
}

/// Usage of the most specific mount containing `path`, rounded to two decimals
fn storage_used_percent(mounts: &[(PathBuf, u64, u64)], path: &Path) -> f64 {
    let Some((_, total, available)) = mounts
        .iter()
        .filter(|(mount, _, _)| path.starts_with(mount))
        .max_by_key(|(mount, _, _)| mount.as_os_str().len())
    else {
        return 0.0;
    };
    if *total == 0 {
        return 0.0;
    }
    let used = total.saturating_sub(*available) as f64 / *total as f64 * 100.0;
    (used * 100.0).round() / 100.0
}

fn read_temperature(zone: &Path) -> Option<f64> {
    let raw = match std::fs::read_to_string(zone) {
        Ok(raw) => raw,
        Err(e) => {
            debug!("Thermal zone {} unreadable: {}", zone.display(), e);
            return None;
        }
    };
    let millidegrees: f64 = raw.trim().parse().ok()?;
    Some((millidegrees / 100.0).round() / 10.0)
}

/// Boot time derived from the system uptime
pub fn boot_time(uptime_secs: u64) -> String {
    let boot = Utc::now() - ChronoDuration::seconds(uptime_secs as i64);
    boot.to_rfc3339_opts(SecondsFormat::Secs, true)
}
