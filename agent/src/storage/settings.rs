//! Settings file management

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::logs::LogLevel;

/// Agent settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Directory for the rolling log file
    #[serde(default = "default_log_dir")]
    pub log_dir: Option<String>,

    /// MQTT broker configuration
    #[serde(default)]
    pub mqtt_broker: MqttBrokerSettings,

    /// Device identity
    #[serde(default)]
    pub device: DeviceSettings,

    /// Root segment of every topic
    #[serde(default = "default_topic_root")]
    pub topic_root: String,

    /// Heartbeat interval in seconds
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Enable the local status server
    #[serde(default = "default_true")]
    pub enable_status_server: bool,

    /// Local status server
    #[serde(default)]
    pub status_server: ServerSettings,

    /// Release slots and update commands
    #[serde(default)]
    pub release: ReleaseSettings,

    /// Hardware actuation commands
    #[serde(default)]
    pub hardware: HardwareSettings,

    /// Capture statistics written by the capture daemon
    #[serde(default = "default_capture_stats_path")]
    pub capture_stats_path: String,
}

fn default_true() -> bool {
    true
}

fn default_log_dir() -> Option<String> {
    Some("/var/log/bmtl-agent".to_string())
}

fn default_topic_root() -> String {
    "bmtl".to_string()
}

fn default_heartbeat_interval() -> u64 {
    60
}

fn default_capture_stats_path() -> String {
    "/var/lib/bmtl-device/camera_stats.json".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_dir: default_log_dir(),
            mqtt_broker: MqttBrokerSettings::default(),
            device: DeviceSettings::default(),
            topic_root: default_topic_root(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            enable_status_server: true,
            status_server: ServerSettings::default(),
            release: ReleaseSettings::default(),
            hardware: HardwareSettings::default(),
            capture_stats_path: default_capture_stats_path(),
        }
    }
}

impl Settings {
    /// Apply `BMTL_*` environment overrides
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("BMTL_MQTT_HOST") {
            self.mqtt_broker.host = host;
        }
        if let Some(port) = lookup("BMTL_MQTT_PORT") {
            match port.parse() {
                Ok(port) => self.mqtt_broker.port = port,
                Err(_) => warn!("Ignoring invalid BMTL_MQTT_PORT: {}", port),
            }
        }
        if let Some(tls) = lookup("BMTL_MQTT_TLS") {
            self.mqtt_broker.tls = matches!(tls.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(username) = lookup("BMTL_MQTT_USERNAME") {
            self.mqtt_broker.username = Some(username);
        }
        if let Some(password) = lookup("BMTL_MQTT_PASSWORD") {
            self.mqtt_broker.password = Some(password);
        }
        if let Some(device_id) = lookup("BMTL_DEVICE_ID") {
            self.device.id = Some(device_id);
        }
    }
}

/// MQTT broker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttBrokerSettings {
    /// Broker host
    #[serde(default = "default_mqtt_host")]
    pub host: String,

    /// Broker port
    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    /// Use TLS
    #[serde(default = "default_true")]
    pub tls: bool,

    /// Optional path to a PEM-encoded CA certificate for broker TLS verification.
    /// When absent, the system certificate store is used.
    #[serde(default)]
    pub ca_cert_path: Option<String>,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,
}

fn default_mqtt_host() -> String {
    "".to_string()
}

fn default_mqtt_port() -> u16 {
    8883
}

impl Default for MqttBrokerSettings {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            tls: true,
            ca_cert_path: None,
            username: None,
            password: None,
        }
    }
}

/// Device identity settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// Numeric device id; derived from the hostname when absent
    #[serde(default)]
    pub id: Option<String>,

    /// Prefix of the module id reported on the wire
    #[serde(default = "default_module_prefix")]
    pub module_prefix: String,
}

fn default_module_prefix() -> String {
    "bmotion".to_string()
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            id: None,
            module_prefix: default_module_prefix(),
        }
    }
}

/// Local HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_server_host")]
    pub host: String,

    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    8080
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}

/// Release manager settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseSettings {
    /// Directory holding both slots, the current pointer, backup and lock
    #[serde(default = "default_install_root")]
    pub install_root: String,

    /// Release source checkout mirrored into the inactive slot
    #[serde(default = "default_source_dir")]
    pub source_dir: String,

    /// Branch pulled before syncing; no pull when absent
    #[serde(default = "default_source_branch")]
    pub source_branch: Option<String>,

    /// Relative paths never mirrored into or deleted from a slot
    #[serde(default = "default_sync_excludes")]
    pub sync_excludes: Vec<String>,

    /// Builds the isolated environment inside the target slot
    #[serde(default = "default_provision_cmd")]
    pub provision_cmd: String,

    /// Self-check run inside the target slot before promotion
    #[serde(default = "default_validate_cmd")]
    pub validate_cmd: String,

    /// Runtime entry point, relative to the slot
    #[serde(default = "default_runtime_entry")]
    pub runtime_entry: String,

    /// Last-resort runtime when neither slot is runnable
    #[serde(default = "default_system_runtime")]
    pub system_runtime: String,

    /// Supervised units stopped and started around promotion
    #[serde(default = "default_services")]
    pub services: Vec<String>,

    /// Status server probed for the running build hash
    #[serde(default = "default_status_url")]
    pub status_url: Option<String>,

    /// Launches a detached update process; `{exe}` and `{mode}` are substituted
    #[serde(default = "default_update_launch_cmd")]
    pub update_launch_cmd: String,
}

fn default_install_root() -> String {
    "/opt/bmtl-device".to_string()
}

fn default_source_dir() -> String {
    "/opt/bmtl-device/source".to_string()
}

fn default_source_branch() -> Option<String> {
    Some("main".to_string())
}

fn default_sync_excludes() -> Vec<String> {
    [".git", "env", "logs", "target", ".release.json"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_provision_cmd() -> String {
    "cargo install --path agent --root env --locked --force".to_string()
}

fn default_validate_cmd() -> String {
    "env/bin/bmtl-agent --self-check".to_string()
}

fn default_runtime_entry() -> String {
    "env/bin/bmtl-agent".to_string()
}

fn default_system_runtime() -> String {
    "/usr/local/bin/bmtl-agent".to_string()
}

fn default_services() -> Vec<String> {
    vec!["bmtl-device.service".to_string()]
}

fn default_status_url() -> Option<String> {
    Some("http://127.0.0.1:8080".to_string())
}

fn default_update_launch_cmd() -> String {
    "systemd-run --collect --unit bmtl-agent-{mode} {exe} --{mode}".to_string()
}

impl Default for ReleaseSettings {
    fn default() -> Self {
        Self {
            install_root: default_install_root(),
            source_dir: default_source_dir(),
            source_branch: default_source_branch(),
            sync_excludes: default_sync_excludes(),
            provision_cmd: default_provision_cmd(),
            validate_cmd: default_validate_cmd(),
            runtime_entry: default_runtime_entry(),
            system_runtime: default_system_runtime(),
            services: default_services(),
            status_url: default_status_url(),
            update_launch_cmd: default_update_launch_cmd(),
        }
    }
}

impl ReleaseSettings {
    pub fn install_root(&self) -> PathBuf {
        PathBuf::from(&self.install_root)
    }

    pub fn source_dir(&self) -> PathBuf {
        PathBuf::from(&self.source_dir)
    }
}

/// Hardware actuation settings. Empty commands disable the actuator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareSettings {
    #[serde(default)]
    pub camera_on_cmd: String,

    #[serde(default)]
    pub camera_off_cmd: String,

    #[serde(default)]
    pub wiper_cmd: String,

    #[serde(default = "default_reboot_cmd")]
    pub reboot_cmd: String,
}

fn default_reboot_cmd() -> String {
    "systemctl reboot".to_string()
}

impl Default for HardwareSettings {
    fn default() -> Self {
        Self {
            camera_on_cmd: String::new(),
            camera_off_cmd: String::new(),
            wiper_cmd: String::new(),
            reboot_cmd: default_reboot_cmd(),
        }
    }
}
