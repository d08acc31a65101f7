//! In-memory collaborators for dispatcher tests

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Map, Value};

use bmtl_agent::dispatch::dispatcher::{Collaborators, Dispatcher, Publisher};
use bmtl_agent::dispatch::state::DeviceState;
use bmtl_agent::errors::AgentError;
use bmtl_agent::filesys::file::File;
use bmtl_agent::hardware::actuators::Actuators;
use bmtl_agent::mqtt::topics::Topics;
use bmtl_agent::release::manager::UpdateMode;
use bmtl_agent::release::trigger::UpdateLauncher;
use bmtl_agent::storage::capture::{CaptureSettings, JsonSettingsStore, SettingsStore};
use bmtl_agent::storage::device::{CameraPower, DeviceIdentity, DeviceProfile};
use bmtl_agent::storage::settings::DeviceSettings;

#[derive(Debug, Clone)]
pub struct Published {
    pub topic: String,
    pub payload: Value,
    pub retain: bool,
}

#[derive(Default)]
pub struct RecordingPublisher {
    pub published: Mutex<Vec<Published>>,
}

impl RecordingPublisher {
    pub fn on(&self, topic: &str) -> Vec<Published> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.topic == topic)
            .cloned()
            .collect()
    }

    pub fn count(&self) -> usize {
        self.published.lock().unwrap().len()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<(), AgentError> {
        self.published.lock().unwrap().push(Published {
            topic: topic.to_string(),
            payload: serde_json::from_slice(&payload).unwrap(),
            retain,
        });
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeActuators {
    pub camera: Mutex<Vec<CameraPower>>,
    pub wiper_runs: Mutex<u32>,
    pub fail_wiper: bool,
}

#[async_trait]
impl Actuators for FakeActuators {
    async fn set_camera_power(&self, state: CameraPower) -> Result<(), AgentError> {
        self.camera.lock().unwrap().push(state);
        Ok(())
    }

    async fn run_wiper(&self) -> Result<(), AgentError> {
        if self.fail_wiper {
            return Err(AgentError::HardwareError("wiper motor stalled".to_string()));
        }
        *self.wiper_runs.lock().unwrap() += 1;
        Ok(())
    }

    async fn reboot(&self) -> Result<(), AgentError> {
        Ok(())
    }

    fn camera_options(&self) -> Map<String, Value> {
        let mut options = Map::new();
        options.insert("iso".to_string(), serde_json::json!(["auto", "100", "200"]));
        options
    }
}

#[derive(Default)]
pub struct FakeUpdates {
    pub launched: Mutex<Vec<UpdateMode>>,
}

#[async_trait]
impl UpdateLauncher for FakeUpdates {
    async fn launch(&self, mode: UpdateMode) -> Result<(), AgentError> {
        self.launched.lock().unwrap().push(mode);
        Ok(())
    }
}

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub dispatcher: Dispatcher,
    pub state: DeviceState,
    pub publisher: Arc<RecordingPublisher>,
    pub actuators: Arc<FakeActuators>,
    pub updates: Arc<FakeUpdates>,
    pub settings_file: File,
    pub device_file: File,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_actuators(FakeActuators::default())
    }

    pub fn with_actuators(actuators: FakeActuators) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let settings_file = File::new(dir.path().join("capture_settings.json"));
        let device_file = File::new(dir.path().join("device.json"));

        let publisher = Arc::new(RecordingPublisher::default());
        let actuators = Arc::new(actuators);
        let updates = Arc::new(FakeUpdates::default());
        let settings_store: Arc<dyn SettingsStore> = Arc::new(JsonSettingsStore::new(settings_file.clone()));

        let identity = DeviceIdentity::resolve(
            &DeviceSettings {
                id: Some("1".to_string()),
                ..Default::default()
            },
            "",
        );
        let topics = Topics::new("bmtl", &identity.device_id);
        let state = DeviceState::new(
            identity,
            DeviceProfile::default(),
            CaptureSettings::default(),
            "0123456789ab".to_string(),
        );

        let dispatcher = Dispatcher::new(
            topics,
            Collaborators {
                publisher: publisher.clone(),
                settings_store,
                actuators: actuators.clone(),
                updates: updates.clone(),
                device_file: device_file.clone(),
            },
        );

        Self {
            dir,
            dispatcher,
            state,
            publisher,
            actuators,
            updates,
            settings_file,
            device_file,
        }
    }

    pub async fn send(&mut self, topic: &str, payload: &str) {
        let dispatched = self
            .dispatcher
            .handle_message(&mut self.state, topic, payload.as_bytes())
            .await;
        if let bmtl_agent::dispatch::dispatcher::Dispatched::Detached(handle) = dispatched {
            handle.await.unwrap();
        }
    }

    /// The one response published on `topic`
    pub fn response(&self, topic: &str) -> Value {
        let published = self.publisher.on(topic);
        assert_eq!(published.len(), 1, "expected one message on {topic}");
        published[0].payload.clone()
    }
}
