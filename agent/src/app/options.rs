//! Application configuration options

use std::path::PathBuf;
use std::time::Duration;

use sysinfo::System;

use crate::mqtt::client::{MqttAddress, MqttCredentials};
use crate::storage::device::DeviceIdentity;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::{DeviceSettings, HardwareSettings, ReleaseSettings, Settings};
use crate::telemetry::TelemetryOptions;
use crate::workers::mqtt;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage layout paths
    pub storage: StorageLayout,

    /// Topic root shared by every device
    pub topic_root: String,

    /// Device identity settings
    pub device: DeviceSettings,

    /// Hardware actuation commands
    pub hardware: HardwareSettings,

    /// Release settings, used to start the release manager on sw-update
    pub release: ReleaseSettings,

    /// Settings file passed on to the release manager, when not the default
    pub settings_path: Option<String>,

    /// Build hash captured at process start
    pub build_hash: String,

    /// Release slot label when started from a slot
    pub slot: Option<String>,

    /// Enable local HTTP status server
    pub enable_status_server: bool,

    /// Server configuration
    pub server: ServerOptions,

    /// MQTT worker options
    pub mqtt_worker: mqtt::Options,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            storage: StorageLayout::default(),
            topic_root: "bmtl".to_string(),
            device: DeviceSettings::default(),
            hardware: HardwareSettings::default(),
            release: ReleaseSettings::default(),
            settings_path: None,
            build_hash: "unknown".to_string(),
            slot: None,
            enable_status_server: true,
            server: ServerOptions::default(),
            mqtt_worker: mqtt::Options::default(),
        }
    }
}

impl AppOptions {
    /// Options for the agent runtime from the loaded settings
    pub fn from_settings(settings: &Settings, storage: StorageLayout) -> Self {
        let broker = &settings.mqtt_broker;
        let credentials = broker.username.as_ref().map(|username| MqttCredentials {
            username: username.clone(),
            password: broker.password.clone().unwrap_or_default(),
        });
        // Brokers drop the older session when a client id is reused
        let hostname = System::host_name().unwrap_or_default();
        let identity = DeviceIdentity::resolve(&settings.device, &hostname);

        Self {
            storage,
            topic_root: settings.topic_root.clone(),
            device: settings.device.clone(),
            hardware: settings.hardware.clone(),
            release: settings.release.clone(),
            enable_status_server: settings.enable_status_server,
            server: ServerOptions {
                host: settings.status_server.host.clone(),
                port: settings.status_server.port,
            },
            mqtt_worker: mqtt::Options {
                broker_address: MqttAddress {
                    host: broker.host.clone(),
                    port: broker.port,
                    use_tls: broker.tls,
                    ca_cert_path: broker.ca_cert_path.clone(),
                },
                credentials,
                client_id: format!("bmtl-device-{}", identity.device_id),
                heartbeat_interval: Duration::from_secs(settings.heartbeat_interval_secs.max(1)),
                telemetry: TelemetryOptions {
                    storage_path: settings.release.install_root(),
                    ..Default::default()
                },
                capture_stats_path: PathBuf::from(&settings.capture_stats_path),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

/// Lifecycle options for the agent
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// Local HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}
