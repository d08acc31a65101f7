//! MQTT topic definitions

use crate::dispatch::envelope::{CommandKind, Scope};

/// MQTT topic patterns for one device
#[derive(Debug, Clone)]
pub struct Topics {
    root: String,
    device_id: String,
}

impl Topics {
    pub fn new(root: &str, device_id: &str) -> Self {
        Self {
            root: root.trim_end_matches('/').to_string(),
            device_id: device_id.to_string(),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Command topic
    pub fn command(&self, kind: CommandKind, scope: &Scope) -> String {
        format!("{}/{}/{}", self.root, kind.topic_path(), scope.segment())
    }

    /// Response topic
    pub fn response(&self, kind: CommandKind, scope: &Scope) -> String {
        format!("{}/response/{}/{}", self.root, kind.response_path(), scope.segment())
    }

    /// Periodic health topic
    pub fn health(&self) -> String {
        format!("{}/status/health/{}", self.root, self.device_id)
    }

    /// Retained identity topic, also carries the last will
    pub fn identity(&self) -> String {
        format!("{}/status/identity/{}", self.root, self.device_id)
    }

    /// Every topic the device subscribes to
    pub fn subscriptions(&self) -> Vec<String> {
        let own = Scope::Device(self.device_id.clone());
        let mut topics = Vec::new();
        for kind in CommandKind::ALL {
            topics.push(self.command(kind, &own));
            if kind.accepts_broadcast() {
                topics.push(self.command(kind, &Scope::All));
            }
        }
        topics
    }

    /// Map an inbound topic back to its command
    pub fn parse(&self, topic: &str) -> Option<(CommandKind, Scope)> {
        let rest = topic.strip_prefix(&self.root)?.strip_prefix('/')?;
        let (path, target) = rest.rsplit_once('/')?;
        let kind = CommandKind::from_topic_path(path)?;

        if target == self.device_id {
            Some((kind, Scope::Device(self.device_id.clone())))
        } else if target == "all" && kind.accepts_broadcast() {
            Some((kind, Scope::All))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_generation() {
        let topics = Topics::new("bmtl", "01");
        assert_eq!(
            topics.command(CommandKind::CameraToggle, &Scope::All),
            "bmtl/request/camera-on-off/all"
        );
        assert_eq!(
            topics.response(CommandKind::SitenameSet, &Scope::Device("01".into())),
            "bmtl/response/set/sitename/01"
        );
        assert_eq!(topics.health(), "bmtl/status/health/01");
        assert_eq!(topics.identity(), "bmtl/status/identity/01");
    }

    #[test]
    fn test_topic_parsing() {
        let topics = Topics::new("bmtl", "01");
        assert_eq!(
            topics.parse("bmtl/request/sw-version/01"),
            Some((CommandKind::VersionGet, Scope::Device("01".into())))
        );
        assert_eq!(
            topics.parse("bmtl/request/reboot/all"),
            Some((CommandKind::Reboot, Scope::All))
        );
        assert_eq!(topics.parse("bmtl/request/reboot/02"), None);
        assert_eq!(topics.parse("bmtl/set/settings/all"), None);
        assert_eq!(topics.parse("bmtl/request/unknown/01"), None);
        assert_eq!(topics.parse("other/request/reboot/01"), None);
    }

    #[test]
    fn test_every_subscription_parses_to_one_command() {
        let topics = Topics::new("bmtl", "07");
        let subscriptions = topics.subscriptions();
        assert_eq!(subscriptions.len(), 20);
        for topic in subscriptions {
            let (kind, scope) = topics.parse(&topic).unwrap();
            assert_eq!(topics.command(kind, &scope), topic);
        }
    }
}
