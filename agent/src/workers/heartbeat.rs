//! Heartbeat payloads and liveness classification
//!
//! The heartbeat is the only liveness signal: nobody acknowledges it, and an
//! observer infers a device offline after missing heartbeats for a fixed multiple
//! of the nominal interval.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::dispatch::state::DeviceState;
use crate::storage::device::CameraPower;
use crate::utils::now_rfc3339;

/// Missed intervals after which a device counts as offline
pub const OFFLINE_MULTIPLIER: u32 = 5;

/// Periodic, non-retained health snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub module_id: String,
    pub status: String,
    pub storage_used: f64,
    pub temperature: f64,
    pub last_capture_time: Option<String>,
    pub last_boot_time: String,
    pub site_name: String,
    pub camera_power: CameraPower,
    /// Captures planned for today by the schedule
    pub today_total_captures: u32,
    pub today_captured_count: u32,
    pub missed_captures: u32,
    pub sw_version: String,
    pub timestamp: String,
}

impl HealthReport {
    pub fn from_state(state: &DeviceState) -> Self {
        Self {
            module_id: state.identity.module_id.clone(),
            status: "online".to_string(),
            storage_used: state.telemetry.storage_used,
            temperature: state.telemetry.temperature,
            last_capture_time: state.capture.last_capture_time.clone(),
            last_boot_time: state.last_boot_time.clone(),
            site_name: state.site_name.clone(),
            camera_power: state.camera_power,
            today_total_captures: state.schedule.planned_captures(),
            today_captured_count: state.capture.successful_captures,
            missed_captures: state.capture.missed_captures,
            sw_version: state.build_hash.clone(),
            timestamp: now_rfc3339(),
        }
    }
}

/// Retained identity message, also registered as the last will
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityAnnouncement {
    pub module_id: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sw_version: Option<String>,
    pub timestamp: String,
}

impl IdentityAnnouncement {
    pub fn online(state: &DeviceState) -> Self {
        Self {
            module_id: state.identity.module_id.clone(),
            status: "online".to_string(),
            site_name: Some(state.site_name.clone()),
            sw_version: Some(state.build_hash.clone()),
            timestamp: now_rfc3339(),
        }
    }

    pub fn offline(module_id: &str) -> Self {
        Self {
            module_id: module_id.to_string(),
            status: "offline".to_string(),
            site_name: None,
            sw_version: None,
            timestamp: now_rfc3339(),
        }
    }
}

/// Liveness as inferred from heartbeat recency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Liveness {
    /// Never heard from
    Unknown,
    Online,
    Offline,
}

/// Classifies devices from the arrival times of their heartbeats
#[derive(Debug, Clone)]
pub struct LivenessTracker {
    interval: Duration,
    last_seen: HashMap<String, Instant>,
}

impl LivenessTracker {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_seen: HashMap::new(),
        }
    }

    /// Silence after which a device is offline
    pub fn offline_after(&self) -> Duration {
        self.interval * OFFLINE_MULTIPLIER
    }

    pub fn record(&mut self, module_id: &str, at: Instant) {
        self.last_seen.insert(module_id.to_string(), at);
    }

    pub fn classify(&self, module_id: &str, now: Instant) -> Liveness {
        match self.last_seen.get(module_id) {
            None => Liveness::Unknown,
            Some(seen) if now.saturating_duration_since(*seen) >= self.offline_after() => {
                Liveness::Offline
            }
            Some(_) => Liveness::Online,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::capture::{CaptureSettings, CaptureStats};
    use crate::storage::device::{DeviceIdentity, DeviceProfile};

    fn state() -> DeviceState {
        let mut state = DeviceState::new(
            DeviceIdentity {
                device_id: "03".to_string(),
                module_id: "bmotion03".to_string(),
            },
            DeviceProfile {
                site_name: "Busan-2".to_string(),
                camera_power: CameraPower::On,
            },
            CaptureSettings::default(),
            "abc123def456".to_string(),
        );
        state.apply_capture_stats(CaptureStats {
            successful_captures: 12,
            missed_captures: 1,
            ..Default::default()
        });
        state
    }

    #[test]
    fn test_health_report_reflects_state() {
        let report = HealthReport::from_state(&state());
        assert_eq!(report.module_id, "bmotion03");
        assert_eq!(report.site_name, "Busan-2");
        assert_eq!(report.today_captured_count, 12);
        assert_eq!(report.missed_captures, 1);
        assert_eq!(report.today_total_captures, CaptureSettings::default().planned_captures());
        assert_eq!(report.sw_version, "abc123def456");

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["camera_power"], "on");
    }

    #[test]
    fn test_offline_identity_is_minimal() {
        let value = serde_json::to_value(IdentityAnnouncement::offline("bmotion03")).unwrap();
        assert_eq!(value["status"], "offline");
        assert!(value.get("site_name").is_none());
    }

    #[test]
    fn test_liveness_after_five_intervals() {
        let interval = Duration::from_secs(60);
        let mut tracker = LivenessTracker::new(interval);
        let start = Instant::now();
        assert_eq!(tracker.classify("bmotion03", start), Liveness::Unknown);

        tracker.record("bmotion03", start);
        assert_eq!(tracker.classify("bmotion03", start + interval * 4), Liveness::Online);
        assert_eq!(tracker.classify("bmotion03", start + interval * 5), Liveness::Offline);

        tracker.record("bmotion03", start + interval * 6);
        assert_eq!(tracker.classify("bmotion03", start + interval * 6), Liveness::Online);
    }
}
