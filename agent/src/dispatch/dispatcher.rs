//! Command dispatcher
//!
//! Routes each inbound message to exactly one handler by (kind, scope). Queries and
//! settings changes are answered inline; reboot, wiper and software updates are
//! handed to their own task so they never hold up message intake or the heartbeat.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::dispatch::envelope::{CommandEnvelope, CommandKind, ResponseEnvelope, Scope};
use crate::dispatch::state::DeviceState;
use crate::errors::AgentError;
use crate::filesys::file::File;
use crate::hardware::actuators::Actuators;
use crate::mqtt::topics::Topics;
use crate::release::manager::UpdateMode;
use crate::release::trigger::UpdateLauncher;
use crate::storage::capture::SettingsStore;
use crate::storage::device::save_profile;
use crate::workers::heartbeat::IdentityAnnouncement;

/// Pause between acknowledging a reboot and rebooting, so the ack leaves the device
pub const REBOOT_GRACE: Duration = Duration::from_secs(2);

/// Outbound side of the broker connection
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<(), AgentError>;
}

/// Collaborators the handlers act through
#[derive(Clone)]
pub struct Collaborators {
    pub publisher: Arc<dyn Publisher>,
    pub settings_store: Arc<dyn SettingsStore>,
    pub actuators: Arc<dyn Actuators>,
    pub updates: Arc<dyn UpdateLauncher>,
    pub device_file: File,
}

/// What became of an inbound message
#[derive(Debug)]
pub enum Dispatched {
    /// Not addressed to a known command, nothing published
    Ignored,
    /// Handled inline and answered
    Answered,
    /// Handed off to its own task
    Detached(JoinHandle<()>),
}

pub struct Dispatcher {
    topics: Topics,
    deps: Collaborators,
}

impl Dispatcher {
    pub fn new(topics: Topics, deps: Collaborators) -> Self {
        Self { topics, deps }
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Route a raw broker message
    pub async fn handle_message(&self, state: &mut DeviceState, topic: &str, payload: &[u8]) -> Dispatched {
        let Some((kind, scope)) = self.topics.parse(topic) else {
            warn!("Ignoring message on unrouted topic {}", topic);
            return Dispatched::Ignored;
        };

        match CommandEnvelope::parse(kind, scope.clone(), payload) {
            Ok(envelope) => self.dispatch(state, envelope).await,
            Err(e) => {
                warn!("Rejecting {} on {}: {}", kind.name(), topic, e);
                if !kind.responds() {
                    return Dispatched::Ignored;
                }
                let response = ResponseEnvelope::failed(kind, &scope, &state.identity.module_id, reason(&e));
                publish_response(self.deps.publisher.as_ref(), &self.topics, kind, &scope, &response).await;
                Dispatched::Answered
            }
        }
    }

    /// Run the handler for one envelope
    pub async fn dispatch(&self, state: &mut DeviceState, envelope: CommandEnvelope) -> Dispatched {
        let CommandEnvelope { kind, scope, payload } = envelope;
        info!("Dispatching {} for {}", kind.name(), scope.segment());

        if kind.is_detached() {
            return Dispatched::Detached(self.detach(state, kind, scope));
        }

        let result = match kind {
            CommandKind::SettingsGet => self.settings_get(state, &scope).await,
            CommandKind::OptionsGet => Ok(self.options_get(state, &scope)),
            CommandKind::VersionGet => Ok(version_get(state, &scope)),
            CommandKind::StatusGet => Ok(status_get(state, &scope)),
            CommandKind::SettingsSet => self.settings_set(state, &scope, &payload).await,
            CommandKind::SitenameSet => self.sitename_set(state, &scope, &payload).await,
            CommandKind::CameraToggle => self.camera_toggle(state, &scope).await,
            CommandKind::Reboot | CommandKind::Wiper | CommandKind::SwUpdate | CommandKind::SwRollback => {
                Err(AgentError::Internal(format!("{} must run detached", kind.name())))
            }
        };

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                warn!("{} failed: {}", kind.name(), e);
                ResponseEnvelope::failed(kind, &scope, &state.identity.module_id, reason(&e))
            }
        };
        publish_response(self.deps.publisher.as_ref(), &self.topics, kind, &scope, &response).await;
        Dispatched::Answered
    }

    // ================================ QUERIES ==================================== //

    async fn settings_get(&self, state: &mut DeviceState, scope: &Scope) -> Result<ResponseEnvelope, AgentError> {
        let settings = self.deps.settings_store.load().await?;
        state.schedule = settings.clone();
        let result = scoped_result(scope, "settings", settings.to_json_map());
        Ok(ResponseEnvelope::ok(CommandKind::SettingsGet, scope, &state.identity.module_id, result))
    }

    fn options_get(&self, state: &DeviceState, scope: &Scope) -> ResponseEnvelope {
        let result = scoped_result(scope, "options", self.deps.actuators.camera_options());
        ResponseEnvelope::ok(CommandKind::OptionsGet, scope, &state.identity.module_id, result)
    }

    // ================================ CHANGES ==================================== //

    async fn settings_set(
        &self,
        state: &mut DeviceState,
        scope: &Scope,
        payload: &Value,
    ) -> Result<ResponseEnvelope, AgentError> {
        let current = self.deps.settings_store.load().await?;
        let merged = current.apply_patch(payload)?;
        self.deps.settings_store.save(&merged).await?;
        info!("Capture settings updated: {:?}", merged);

        let mut result = Map::new();
        result.insert("settings".to_string(), Value::Object(merged.to_json_map()));
        state.schedule = merged;
        Ok(ResponseEnvelope::ok(CommandKind::SettingsSet, scope, &state.identity.module_id, result)
            .with_message("Settings applied successfully"))
    }

    async fn sitename_set(
        &self,
        state: &mut DeviceState,
        scope: &Scope,
        payload: &Value,
    ) -> Result<ResponseEnvelope, AgentError> {
        let site_name = payload
            .get("site_name")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| AgentError::ValidationError("site_name must be a non-empty string".to_string()))?
            .to_string();

        let mut profile = state.profile();
        profile.site_name = site_name.clone();
        save_profile(&self.deps.device_file, &profile).await?;
        state.site_name = site_name.clone();
        info!("Site name updated to {}", site_name);

        // late subscribers see the new name on the retained identity
        publish_json(
            self.deps.publisher.as_ref(),
            &self.topics.identity(),
            &IdentityAnnouncement::online(state),
            true,
        )
        .await;

        let mut result = Map::new();
        result.insert("new_sitename".to_string(), json!(site_name));
        Ok(ResponseEnvelope::ok(CommandKind::SitenameSet, scope, &state.identity.module_id, result)
            .with_message(format!("Site name updated to '{site_name}'")))
    }

    async fn camera_toggle(&self, state: &mut DeviceState, scope: &Scope) -> Result<ResponseEnvelope, AgentError> {
        let previous = state.camera_power;
        let next = previous.toggled();
        self.deps.actuators.set_camera_power(next).await?;
        state.camera_power = next;

        if let Err(e) = save_profile(&self.deps.device_file, &state.profile()).await {
            warn!("Camera is {} but the profile could not be saved: {}", next.as_str(), e);
        }

        let mut result = Map::new();
        result.insert("previous_state".to_string(), json!(previous.as_str()));
        result.insert("new_state".to_string(), json!(next.as_str()));
        Ok(ResponseEnvelope::ok(CommandKind::CameraToggle, scope, &state.identity.module_id, result)
            .with_message(format!("Camera turned {}", next.as_str())))
    }

    // =============================== DETACHED ==================================== //

    fn detach(&self, state: &DeviceState, kind: CommandKind, scope: Scope) -> JoinHandle<()> {
        let deps = self.deps.clone();
        let topics = self.topics.clone();
        let module_id = state.identity.module_id.clone();

        tokio::spawn(async move {
            match kind {
                CommandKind::Reboot => {
                    let ack = ResponseEnvelope::ok(kind, &scope, &module_id, Map::new())
                        .with_message("Reboot initiated successfully");
                    publish_response(deps.publisher.as_ref(), &topics, kind, &scope, &ack).await;
                    tokio::time::sleep(REBOOT_GRACE).await;
                    if let Err(e) = deps.actuators.reboot().await {
                        error!("Reboot failed after it was acknowledged: {}", e);
                    }
                }
                CommandKind::Wiper => {
                    let response = match deps.actuators.run_wiper().await {
                        Ok(()) => ResponseEnvelope::ok(kind, &scope, &module_id, Map::new())
                            .with_message("Wiper operation completed"),
                        Err(e) => {
                            warn!("Wiper failed: {}", e);
                            ResponseEnvelope::failed(kind, &scope, &module_id, reason(&e))
                        }
                    };
                    publish_response(deps.publisher.as_ref(), &topics, kind, &scope, &response).await;
                }
                CommandKind::SwUpdate | CommandKind::SwRollback => {
                    let mode = if kind == CommandKind::SwUpdate {
                        UpdateMode::Update
                    } else {
                        UpdateMode::Revert
                    };
                    // no response: the outcome shows as a new sw_version, or as silence
                    match deps.updates.launch(mode).await {
                        Ok(()) => info!("Release manager started in {} mode", mode),
                        Err(e) => error!("Unable to start release manager in {} mode: {}", mode, e),
                    }
                }
                other => error!("{} cannot run detached", other.name()),
            }
        })
    }
}

fn version_get(state: &DeviceState, scope: &Scope) -> ResponseEnvelope {
    let mut result = Map::new();
    result.insert("commit_hash".to_string(), json!(state.build_hash));
    ResponseEnvelope::ok(CommandKind::VersionGet, scope, &state.identity.module_id, result)
}

fn status_get(state: &DeviceState, scope: &Scope) -> ResponseEnvelope {
    let mut result = Map::new();
    result.insert("system_status".to_string(), json!("normal"));
    result.insert("connected_modules".to_string(), json!([state.identity.module_id]));
    result.insert("site_name".to_string(), json!(state.site_name));
    result.insert("camera_power".to_string(), json!(state.camera_power.as_str()));
    ResponseEnvelope::ok(CommandKind::StatusGet, scope, &state.identity.module_id, result)
}

/// Single-device results are nested under `key`; broadcast results are keyed by module
fn scoped_result(scope: &Scope, key: &str, value: Map<String, Value>) -> Map<String, Value> {
    match scope {
        Scope::All => value,
        Scope::Device(_) => {
            let mut result = Map::new();
            result.insert(key.to_string(), Value::Object(value));
            result
        }
    }
}

/// Human readable failure reason for a response message
fn reason(err: &AgentError) -> String {
    match err {
        AgentError::ValidationError(message) | AgentError::HardwareError(message) => message.clone(),
        other => other.to_string(),
    }
}

async fn publish_response(
    publisher: &dyn Publisher,
    topics: &Topics,
    kind: CommandKind,
    scope: &Scope,
    response: &ResponseEnvelope,
) {
    publish_json(publisher, &topics.response(kind, scope), response, false).await;
}

async fn publish_json<T: Serialize>(publisher: &dyn Publisher, topic: &str, value: &T, retain: bool) {
    let payload = match serde_json::to_vec(value) {
        Ok(payload) => payload,
        Err(e) => {
            error!("Unable to encode message for {}: {}", topic, e);
            return;
        }
    };
    match publisher.publish(topic, payload, retain).await {
        Ok(()) => debug!("Published to {}", topic),
        Err(e) => warn!("Unable to publish to {}: {}", topic, e),
    }
}
