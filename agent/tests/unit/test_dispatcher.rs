//! Dispatcher tests against in-memory collaborators

use bmtl_agent::release::manager::UpdateMode;
use bmtl_agent::storage::capture::CaptureSettings;
use bmtl_agent::storage::device::{load_profile, CameraPower};

use crate::fakes::{FakeActuators, Harness};

#[tokio::test]
async fn test_camera_toggle_reports_previous_and_new_state() {
    let mut h = Harness::new();
    assert_eq!(h.state.camera_power, CameraPower::Off);

    h.send("bmtl/request/camera-on-off/01", "{}").await;

    let response = h.response("bmtl/response/camera-on-off/01");
    assert_eq!(response["response_type"], "camera_power_result");
    assert_eq!(response["module_id"], "bmotion01");
    assert_eq!(response["success"], true);
    assert_eq!(response["previous_state"], "off");
    assert_eq!(response["new_state"], "on");

    assert_eq!(h.state.camera_power, CameraPower::On);
    assert_eq!(*h.actuators.camera.lock().unwrap(), vec![CameraPower::On]);
    let profile = load_profile(&h.device_file).await.unwrap();
    assert_eq!(profile.camera_power, CameraPower::On);
}

#[tokio::test]
async fn test_invalid_settings_are_rejected_and_nothing_is_written() {
    let mut h = Harness::new();

    h.send("bmtl/set/settings/01", r#"{"capture_interval": -1}"#).await;

    let response = h.response("bmtl/response/set/settings/01");
    assert_eq!(response["response_type"], "set_settings_result");
    assert_eq!(response["success"], false);
    assert!(response["message"].as_str().unwrap().contains("capture_interval"));
    assert!(!h.settings_file.exists().await);
    assert_eq!(h.state.schedule, CaptureSettings::default());
}

#[tokio::test]
async fn test_invalid_settings_leave_existing_settings_untouched() {
    let mut h = Harness::new();
    h.send("bmtl/set/settings/01", r#"{"capture_interval": 5, "iso": "400"}"#).await;
    let before = h.settings_file.read_string().await.unwrap();
    let schedule_before = h.state.schedule.clone();

    h.send("bmtl/set/settings/01", r#"{"capture_interval": -1}"#).await;

    let responses = h.publisher.on("bmtl/response/set/settings/01");
    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0].payload["success"], true);
    assert_eq!(responses[1].payload["success"], false);
    assert_eq!(h.settings_file.read_string().await.unwrap(), before);
    assert_eq!(h.state.schedule, schedule_before);
    assert_eq!(h.state.schedule.capture_interval, 5);
    assert_eq!(h.state.schedule.iso, "400");
}

#[tokio::test]
async fn test_unknown_settings_key_is_rejected() {
    let mut h = Harness::new();

    h.send("bmtl/set/settings/01", r#"{"captureInterval": 5}"#).await;

    let response = h.response("bmtl/response/set/settings/01");
    assert_eq!(response["success"], false);
    assert!(!h.settings_file.exists().await);
}

#[tokio::test]
async fn test_settings_set_is_idempotent() {
    let mut h = Harness::new();
    let payload = r#"{"capture_interval": 5, "quality": 90}"#;

    h.send("bmtl/set/settings/01", payload).await;
    let first = h.settings_file.read_string().await.unwrap();
    h.send("bmtl/set/settings/01", payload).await;
    let second = h.settings_file.read_string().await.unwrap();

    assert_eq!(first, second);
    let responses = h.publisher.on("bmtl/response/set/settings/01");
    assert_eq!(responses.len(), 2);
    for response in responses {
        assert_eq!(response.payload["success"], true);
        assert_eq!(response.payload["settings"]["capture_interval"], 5);
        assert_eq!(response.payload["settings"]["quality"], 90);
    }
    assert_eq!(h.state.schedule.capture_interval, 5);
}

#[tokio::test]
async fn test_settings_get_returns_persisted_settings() {
    let mut h = Harness::new();
    h.send("bmtl/set/settings/01", r#"{"iso": "400"}"#).await;

    h.send("bmtl/request/settings/01", "").await;

    let response = h.response("bmtl/response/settings/01");
    assert_eq!(response["response_type"], "settings");
    assert_eq!(response["settings"]["iso"], "400");
}

#[tokio::test]
async fn test_broadcast_settings_get_is_keyed_by_module() {
    let mut h = Harness::new();

    h.send("bmtl/request/settings/all", "{}").await;

    let response = h.response("bmtl/response/settings/all");
    assert_eq!(response["response_type"], "all_settings");
    assert!(response.get("module_id").is_none());
    assert_eq!(response["modules"]["bmotion01"]["capture_interval"], 10);
}

#[tokio::test]
async fn test_sitename_round_trip() {
    let mut h = Harness::new();

    h.send("bmtl/set/sitename/01", r#"{"site_name": "Seoul-1"}"#).await;

    let response = h.response("bmtl/response/set/sitename/01");
    assert_eq!(response["success"], true);
    assert_eq!(response["new_sitename"], "Seoul-1");
    assert_eq!(h.state.site_name, "Seoul-1");
    assert_eq!(load_profile(&h.device_file).await.unwrap().site_name, "Seoul-1");

    let identity = h.publisher.on("bmtl/status/identity/01");
    assert_eq!(identity.len(), 1);
    assert!(identity[0].retain);
    assert_eq!(identity[0].payload["site_name"], "Seoul-1");

    h.send("bmtl/request/status/01", "{}").await;
    let status = h.response("bmtl/response/status/01");
    assert_eq!(status["site_name"], "Seoul-1");
    assert_eq!(status["system_status"], "normal");
}

#[tokio::test]
async fn test_empty_sitename_is_rejected() {
    let mut h = Harness::new();

    h.send("bmtl/set/sitename/01", r#"{"site_name": "  "}"#).await;

    let response = h.response("bmtl/response/set/sitename/01");
    assert_eq!(response["success"], false);
    assert!(!h.device_file.exists().await);
}

#[tokio::test]
async fn test_malformed_payload_is_answered_and_dispatch_continues() {
    let mut h = Harness::new();

    h.send("bmtl/request/sw-version/01", "{not json").await;
    h.send("bmtl/request/options/01", "{}").await;

    let failed = h.response("bmtl/response/sw-version/01");
    assert_eq!(failed["success"], false);
    let options = h.response("bmtl/response/options/01");
    assert_eq!(options["success"], true);
    assert_eq!(options["options"]["iso"][0], "auto");
}

#[tokio::test]
async fn test_version_reports_build_hash() {
    let mut h = Harness::new();

    h.send("bmtl/request/sw-version/01", "").await;

    let response = h.response("bmtl/response/sw-version/01");
    assert_eq!(response["response_type"], "sw_version_result");
    assert_eq!(response["commit_hash"], "0123456789ab");
}

#[tokio::test]
async fn test_messages_for_other_devices_are_ignored() {
    let mut h = Harness::new();

    h.send("bmtl/request/status/02", "{}").await;
    h.send("bmtl/request/unknown/01", "{}").await;

    assert_eq!(h.publisher.count(), 0);
}

#[tokio::test]
async fn test_wiper_failure_is_reported() {
    let mut h = Harness::with_actuators(FakeActuators {
        fail_wiper: true,
        ..Default::default()
    });

    h.send("bmtl/request/wiper/01", "{}").await;

    let response = h.response("bmtl/response/wiper/01");
    assert_eq!(response["success"], false);
    assert_eq!(response["message"], "wiper motor stalled");
}

#[tokio::test]
async fn test_wiper_success_after_completion() {
    let mut h = Harness::new();

    h.send("bmtl/request/wiper/all", "{}").await;

    let response = h.response("bmtl/response/wiper/all");
    assert_eq!(response["success"], true);
    assert_eq!(*h.actuators.wiper_runs.lock().unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reboot_is_acknowledged_first() {
    let mut h = Harness::new();

    h.send("bmtl/request/reboot/all", "{}").await;

    let response = h.response("bmtl/response/reboot/all");
    assert_eq!(response["response_type"], "reboot_all_result");
    assert_eq!(response["success"], true);
}

#[tokio::test]
async fn test_software_update_launches_without_response() {
    let mut h = Harness::new();

    h.send("bmtl/request/sw-update/01", "{}").await;
    h.send("bmtl/request/sw-rollback/all", "{}").await;

    assert_eq!(
        *h.updates.launched.lock().unwrap(),
        vec![UpdateMode::Update, UpdateMode::Revert]
    );
    assert_eq!(h.publisher.count(), 0);
}
