//! Self-check run inside a freshly provisioned slot before promotion

use serde::Serialize;
use tracing::info;

use crate::app::options::AppOptions;
use crate::dispatch::envelope::CommandKind;
use crate::errors::AgentError;
use crate::mqtt::topics::Topics;
use crate::storage::capture::CaptureSettings;
use crate::storage::device::DeviceIdentity;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;
use crate::utils::{version_info, VersionInfo};

#[derive(Debug, Serialize)]
pub struct CheckReport {
    pub version: VersionInfo,
    pub module_id: String,
    pub subscriptions: usize,
}

/// Exercise settings, identity, topic routing and capture validation without touching the
/// network or the device configuration.
pub fn self_check(settings: &Settings) -> Result<CheckReport, AgentError> {
    let options = AppOptions::from_settings(settings, StorageLayout::default());
    let identity = DeviceIdentity::resolve(&options.device, "");
    let topics = Topics::new(&options.topic_root, &identity.device_id);

    let subscriptions = topics.subscriptions();
    for topic in &subscriptions {
        if topics.parse(topic).is_none() {
            return Err(AgentError::Internal(format!("subscribed topic is not routed: {topic}")));
        }
    }
    for kind in CommandKind::ALL {
        if CommandKind::from_topic_path(kind.topic_path()) != Some(kind) {
            return Err(AgentError::Internal(format!("ambiguous command path: {}", kind.topic_path())));
        }
    }

    CaptureSettings::default().validate()?;

    info!("Self-check passed ({} subscriptions)", subscriptions.len());
    Ok(CheckReport {
        version: version_info(),
        module_id: identity.module_id,
        subscriptions: subscriptions.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_check_with_defaults() {
        let report = self_check(&Settings::default()).unwrap();
        assert_eq!(report.module_id, "bmotion01");
        assert_eq!(report.subscriptions, 20);
    }
}
