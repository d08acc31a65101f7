//! Application state management

use std::path::PathBuf;
use std::sync::Arc;

use sysinfo::System;
use tracing::{info, warn};

use crate::app::options::AppOptions;
use crate::dispatch::state::DeviceState;
use crate::errors::AgentError;
use crate::hardware::actuators::CommandActuators;
use crate::mqtt::topics::Topics;
use crate::release::trigger::CommandUpdateLauncher;
use crate::storage::capture::{JsonSettingsStore, SettingsStore};
use crate::storage::device::{load_profile, DeviceIdentity};
use crate::workers::mqtt;

/// Main application state
pub struct AppState {
    /// Device state handed to the MQTT worker
    pub device: DeviceState,

    /// Topics of this device
    pub topics: Topics,

    /// Collaborators of the dispatcher
    pub deps: mqtt::Deps,
}

impl AppState {
    /// Initialize application state
    pub async fn init(options: &AppOptions) -> Result<Self, AgentError> {
        info!("Initializing application state...");

        let layout = &options.storage;
        if let Err(e) = layout.setup().await {
            warn!("Unable to create {}: {}", layout.base_dir.display(), e);
        }

        let hostname = System::host_name().unwrap_or_default();
        let identity = DeviceIdentity::resolve(&options.device, &hostname);
        info!("Device identity: {} (module {})", identity.device_id, identity.module_id);

        let device_file = layout.device_file();
        let profile = match load_profile(&device_file).await {
            Ok(profile) => profile,
            Err(e) => {
                warn!("Unable to read device profile, using defaults: {}", e);
                Default::default()
            }
        };

        let settings_store: Arc<dyn SettingsStore> =
            Arc::new(JsonSettingsStore::new(layout.capture_settings_file()));
        let schedule = match settings_store.load().await {
            Ok(schedule) => schedule,
            Err(e) => {
                warn!("Unable to read capture settings, using defaults: {}", e);
                Default::default()
            }
        };

        let exe = std::env::current_exe().unwrap_or_else(|_| PathBuf::from(&options.release.system_runtime));
        let updates = CommandUpdateLauncher::new(
            &options.release.update_launch_cmd,
            exe,
            options.settings_path.clone(),
        );

        let topics = Topics::new(&options.topic_root, &identity.device_id);
        let device = DeviceState::new(identity, profile, schedule, options.build_hash.clone());

        Ok(Self {
            device,
            topics,
            deps: mqtt::Deps {
                settings_store,
                actuators: Arc::new(CommandActuators::new(options.hardware.clone())),
                updates: Arc::new(updates),
                device_file,
            },
        })
    }
}
