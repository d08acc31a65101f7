//! Link state machine and liveness tests

use std::time::{Duration, Instant};

use bmtl_agent::utils::{calc_exp_backoff, CooldownOptions};
use bmtl_agent::workers::heartbeat::{Liveness, LivenessTracker};
use bmtl_agent::workers::link::{LinkEvent, LinkFsm, LinkState, DEFAULT_MAX_CONNECT_ATTEMPTS};

#[test]
fn test_link_initial_state() {
    let fsm = LinkFsm::new(DEFAULT_MAX_CONNECT_ATTEMPTS);
    assert_eq!(fsm.state(), LinkState::Disconnected);
    assert!(fsm.error().is_none());
    assert_eq!(fsm.failed_attempts(), 0);
    assert!(!fsm.is_connected());
}

#[test]
fn test_link_connect_flow() {
    let mut fsm = LinkFsm::new(DEFAULT_MAX_CONNECT_ATTEMPTS);

    fsm.process(LinkEvent::Connect).unwrap();
    assert_eq!(fsm.state(), LinkState::Connecting);

    fsm.process(LinkEvent::ConnAck).unwrap();
    assert_eq!(fsm.state(), LinkState::Subscribed);

    fsm.process(LinkEvent::SubAck).unwrap();
    assert_eq!(fsm.state(), LinkState::Dispatching);
    assert!(fsm.is_connected());
}

#[test]
fn test_link_gives_up_after_consecutive_failures() {
    let mut fsm = LinkFsm::new(DEFAULT_MAX_CONNECT_ATTEMPTS);

    for attempt in 1..DEFAULT_MAX_CONNECT_ATTEMPTS {
        fsm.process(LinkEvent::Connect).unwrap();
        let state = fsm.process(LinkEvent::ConnectionLost("refused".to_string())).unwrap();
        assert_eq!(state, LinkState::Disconnected);
        assert_eq!(fsm.failed_attempts(), attempt);
    }

    fsm.process(LinkEvent::Connect).unwrap();
    let state = fsm.process(LinkEvent::ConnectionLost("refused".to_string())).unwrap();
    assert_eq!(state, LinkState::Unrecoverable);
    assert!(fsm.is_terminal());
    assert_eq!(fsm.error(), Some("refused"));
    assert!(fsm.process(LinkEvent::Connect).is_err());
}

#[test]
fn test_link_successful_connect_resets_failures() {
    let mut fsm = LinkFsm::new(3);

    fsm.process(LinkEvent::Connect).unwrap();
    fsm.process(LinkEvent::ConnectionLost("timeout".to_string())).unwrap();
    fsm.process(LinkEvent::Connect).unwrap();
    fsm.process(LinkEvent::ConnAck).unwrap();
    assert_eq!(fsm.failed_attempts(), 0);

    // losing an established link does not count as a failed attempt
    fsm.process(LinkEvent::ConnectionLost("reset".to_string())).unwrap();
    assert_eq!(fsm.state(), LinkState::Disconnected);
    assert_eq!(fsm.failed_attempts(), 0);
}

#[test]
fn test_link_rejects_invalid_transitions() {
    let mut fsm = LinkFsm::new(DEFAULT_MAX_CONNECT_ATTEMPTS);

    assert!(fsm.process(LinkEvent::ConnAck).is_err());
    assert!(fsm.process(LinkEvent::SubAck).is_err());
    assert_eq!(fsm.state(), LinkState::Disconnected);

    fsm.process(LinkEvent::Shutdown).unwrap();
    assert_eq!(fsm.state(), LinkState::Terminated);
    assert!(fsm.process(LinkEvent::Connect).is_err());
}

#[test]
fn test_reconnect_backoff_is_capped() {
    let options = CooldownOptions::default();
    assert_eq!(calc_exp_backoff(&options, 0), Duration::from_secs(1));
    assert_eq!(calc_exp_backoff(&options, 3), Duration::from_secs(8));
    assert_eq!(calc_exp_backoff(&options, 9), Duration::from_secs(60));
}

#[test]
fn test_liveness_goes_offline_after_five_intervals() {
    let mut tracker = LivenessTracker::new(Duration::from_secs(60));
    let start = Instant::now();

    assert_eq!(tracker.classify("bmotion01", start), Liveness::Unknown);

    tracker.record("bmotion01", start);
    assert_eq!(
        tracker.classify("bmotion01", start + Duration::from_secs(299)),
        Liveness::Online
    );
    assert_eq!(
        tracker.classify("bmotion01", start + Duration::from_secs(300)),
        Liveness::Offline
    );

    // a single heartbeat brings the device back
    tracker.record("bmotion01", start + Duration::from_secs(400));
    assert_eq!(
        tracker.classify("bmotion01", start + Duration::from_secs(401)),
        Liveness::Online
    );
}
