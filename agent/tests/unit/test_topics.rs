//! Topic routing tests

use bmtl_agent::dispatch::envelope::{CommandKind, Scope};
use bmtl_agent::mqtt::topics::Topics;

#[test]
fn test_every_subscription_routes_to_one_command() {
    let topics = Topics::new("bmtl", "07");

    let subscriptions = topics.subscriptions();
    assert_eq!(subscriptions.len(), 20);
    for topic in &subscriptions {
        let (kind, scope) = topics.parse(topic).unwrap();
        assert_eq!(&topics.command(kind, &scope), topic);
    }
}

#[test]
fn test_set_commands_are_never_broadcast() {
    let topics = Topics::new("bmtl", "07");

    assert!(topics.parse("bmtl/set/settings/all").is_none());
    assert!(topics.parse("bmtl/set/sitename/all").is_none());
    assert_eq!(
        topics.parse("bmtl/set/sitename/07"),
        Some((CommandKind::SitenameSet, Scope::Device("07".to_string())))
    );
}

#[test]
fn test_response_topics() {
    let topics = Topics::new("bmtl", "07");

    assert_eq!(
        topics.response(CommandKind::CameraToggle, &Scope::All),
        "bmtl/response/camera-on-off/all"
    );
    assert_eq!(
        topics.response(CommandKind::SettingsSet, &Scope::Device("07".to_string())),
        "bmtl/response/set/settings/07"
    );
    assert_eq!(topics.health(), "bmtl/status/health/07");
    assert_eq!(topics.identity(), "bmtl/status/identity/07");
}

#[test]
fn test_foreign_topics_are_not_routed() {
    let topics = Topics::new("bmtl", "07");

    assert!(topics.parse("bmtl/request/status/08").is_none());
    assert!(topics.parse("other/request/status/07").is_none());
    assert!(topics.parse("bmtl/request/teleport/07").is_none());
    assert!(topics.parse("bmtlx/request/status/07").is_none());
}
