//! Command and response envelopes

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::AgentError;
use crate::utils::now_rfc3339;

/// Every command the device answers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    SettingsGet,
    OptionsGet,
    VersionGet,
    StatusGet,
    SettingsSet,
    SitenameSet,
    CameraToggle,
    Reboot,
    Wiper,
    SwUpdate,
    SwRollback,
}

impl CommandKind {
    pub const ALL: [CommandKind; 11] = [
        CommandKind::SettingsGet,
        CommandKind::OptionsGet,
        CommandKind::VersionGet,
        CommandKind::StatusGet,
        CommandKind::SettingsSet,
        CommandKind::SitenameSet,
        CommandKind::CameraToggle,
        CommandKind::Reboot,
        CommandKind::Wiper,
        CommandKind::SwUpdate,
        CommandKind::SwRollback,
    ];

    /// Topic path below the root, without the target segment
    pub fn topic_path(&self) -> &'static str {
        match self {
            CommandKind::SettingsGet => "request/settings",
            CommandKind::OptionsGet => "request/options",
            CommandKind::VersionGet => "request/sw-version",
            CommandKind::StatusGet => "request/status",
            CommandKind::SettingsSet => "set/settings",
            CommandKind::SitenameSet => "set/sitename",
            CommandKind::CameraToggle => "request/camera-on-off",
            CommandKind::Reboot => "request/reboot",
            CommandKind::Wiper => "request/wiper",
            CommandKind::SwUpdate => "request/sw-update",
            CommandKind::SwRollback => "request/sw-rollback",
        }
    }

    /// Response topic path below the root, without the target segment
    pub fn response_path(&self) -> &'static str {
        let path = self.topic_path();
        path.strip_prefix("request/").unwrap_or(path)
    }

    pub fn from_topic_path(path: &str) -> Option<CommandKind> {
        CommandKind::ALL.iter().find(|kind| kind.topic_path() == path).copied()
    }

    /// Set commands only address a single device
    pub fn accepts_broadcast(&self) -> bool {
        !matches!(self, CommandKind::SettingsSet | CommandKind::SitenameSet)
    }

    /// Whether the command publishes a response of its own
    pub fn responds(&self) -> bool {
        !matches!(self, CommandKind::SwUpdate | CommandKind::SwRollback)
    }

    /// Long-running commands run outside the dispatch loop
    pub fn is_detached(&self) -> bool {
        matches!(
            self,
            CommandKind::Reboot | CommandKind::Wiper | CommandKind::SwUpdate | CommandKind::SwRollback
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::SettingsGet => "settings-get",
            CommandKind::OptionsGet => "options-get",
            CommandKind::VersionGet => "version-get",
            CommandKind::StatusGet => "status-get",
            CommandKind::SettingsSet => "settings-set",
            CommandKind::SitenameSet => "sitename-set",
            CommandKind::CameraToggle => "camera-toggle",
            CommandKind::Reboot => "reboot",
            CommandKind::Wiper => "wiper",
            CommandKind::SwUpdate => "sw-update",
            CommandKind::SwRollback => "sw-rollback",
        }
    }

    /// `response_type` field of the response envelope
    pub fn response_type(&self, scope: &Scope) -> &'static str {
        match (self, scope) {
            (CommandKind::SettingsGet, Scope::All) => "all_settings",
            (CommandKind::SettingsGet, _) => "settings",
            (CommandKind::OptionsGet, Scope::All) => "all_options",
            (CommandKind::OptionsGet, _) => "options",
            (CommandKind::VersionGet, _) => "sw_version_result",
            (CommandKind::StatusGet, _) => "status",
            (CommandKind::SettingsSet, _) => "set_settings_result",
            (CommandKind::SitenameSet, _) => "set_sitename_result",
            (CommandKind::CameraToggle, _) => "camera_power_result",
            (CommandKind::Reboot, Scope::All) => "reboot_all_result",
            (CommandKind::Reboot, _) => "reboot_result",
            (CommandKind::Wiper, _) => "wiper_result",
            (CommandKind::SwUpdate, _) => "sw_update_result",
            (CommandKind::SwRollback, _) => "sw_rollback_result",
        }
    }
}

/// Who a command is addressed to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    Device(String),
    All,
}

impl Scope {
    /// Last topic segment
    pub fn segment(&self) -> &str {
        match self {
            Scope::Device(id) => id,
            Scope::All => "all",
        }
    }
}

/// An inbound command
#[derive(Debug, Clone, PartialEq)]
pub struct CommandEnvelope {
    pub kind: CommandKind,
    pub scope: Scope,
    pub payload: Value,
}

impl CommandEnvelope {
    /// Build an envelope from a routed topic and its raw payload.
    ///
    /// An empty payload reads as an empty object.
    pub fn parse(kind: CommandKind, scope: Scope, payload: &[u8]) -> Result<Self, AgentError> {
        let payload = if payload.iter().all(|b| b.is_ascii_whitespace()) {
            Value::Object(Map::new())
        } else {
            serde_json::from_slice(payload)
                .map_err(|e| AgentError::ValidationError(format!("malformed payload: {e}")))?
        };
        Ok(Self { kind, scope, payload })
    }
}

/// An outbound response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub response_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_id: Option<String>,

    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Kind-specific result fields
    #[serde(flatten)]
    pub result: Map<String, Value>,

    pub timestamp: String,
}

impl ResponseEnvelope {
    /// A successful response. Broadcast results are keyed by module id under `modules`.
    pub fn ok(kind: CommandKind, scope: &Scope, module_id: &str, result: Map<String, Value>) -> Self {
        let (module, result) = match scope {
            Scope::Device(_) => (Some(module_id.to_string()), result),
            Scope::All => {
                let mut modules = Map::new();
                modules.insert(module_id.to_string(), Value::Object(result));
                let mut wrapped = Map::new();
                wrapped.insert("modules".to_string(), Value::Object(modules));
                (None, wrapped)
            }
        };
        Self {
            response_type: kind.response_type(scope).to_string(),
            module_id: module,
            success: true,
            message: None,
            result,
            timestamp: now_rfc3339(),
        }
    }

    pub fn failed(kind: CommandKind, scope: &Scope, module_id: &str, message: impl Into<String>) -> Self {
        Self {
            response_type: kind.response_type(scope).to_string(),
            module_id: Some(module_id.to_string()),
            success: false,
            message: Some(message.into()),
            result: Map::new(),
            timestamp: now_rfc3339(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_topic_paths_are_unique() {
        for kind in CommandKind::ALL {
            assert_eq!(CommandKind::from_topic_path(kind.topic_path()), Some(kind));
        }
    }

    #[test]
    fn test_response_paths() {
        assert_eq!(CommandKind::CameraToggle.response_path(), "camera-on-off");
        assert_eq!(CommandKind::SettingsSet.response_path(), "set/settings");
    }

    #[test]
    fn test_empty_payload_is_an_empty_object() {
        let envelope = CommandEnvelope::parse(CommandKind::Wiper, Scope::All, b"  ").unwrap();
        assert_eq!(envelope.payload, json!({}));
    }

    #[test]
    fn test_malformed_payload_is_a_validation_error() {
        let err = CommandEnvelope::parse(CommandKind::SettingsSet, Scope::Device("01".into()), b"{iso")
            .unwrap_err();
        assert!(matches!(err, AgentError::ValidationError(_)));
    }

    #[test]
    fn test_device_response_shape() {
        let mut result = Map::new();
        result.insert("new_state".into(), json!("on"));
        let response = ResponseEnvelope::ok(
            CommandKind::CameraToggle,
            &Scope::Device("01".into()),
            "bmotion01",
            result,
        );
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["response_type"], "camera_power_result");
        assert_eq!(value["module_id"], "bmotion01");
        assert_eq!(value["new_state"], "on");
        assert!(value.get("message").is_none());
    }

    #[test]
    fn test_broadcast_response_is_keyed_by_module() {
        let mut result = Map::new();
        result.insert("iso".into(), json!("auto"));
        let response = ResponseEnvelope::ok(CommandKind::SettingsGet, &Scope::All, "bmotion01", result);
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["response_type"], "all_settings");
        assert_eq!(value["modules"]["bmotion01"]["iso"], "auto");
        assert!(value.get("module_id").is_none());
    }
}
