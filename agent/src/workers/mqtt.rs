//! MQTT worker for real-time communication
//!
//! One task owns the broker connection, the device state, the heartbeat timer and
//! the dispatcher. Broker I/O, heartbeats and inline handlers take turns in a single
//! `select!` loop, so the device state needs no locking.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::dispatch::dispatcher::{Collaborators, Dispatcher, Publisher};
use crate::dispatch::state::DeviceState;
use crate::errors::AgentError;
use crate::filesys::file::File;
use crate::hardware::actuators::Actuators;
use crate::mqtt::client::{MqttAddress, MqttClient, MqttCredentials, MqttEvent, Will};
use crate::mqtt::topics::Topics;
use crate::release::trigger::UpdateLauncher;
use crate::storage::capture::{read_capture_stats, SettingsStore};
use crate::telemetry::{collect_telemetry, TelemetryOptions};
use crate::utils::{calc_exp_backoff, CooldownOptions};
use crate::workers::heartbeat::{HealthReport, IdentityAnnouncement, Liveness, LivenessTracker};
use crate::workers::link::{LinkEvent, LinkFsm, LinkState, DEFAULT_MAX_CONNECT_ATTEMPTS};

/// MQTT worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// MQTT broker address
    pub broker_address: MqttAddress,

    /// Optional broker credentials
    pub credentials: Option<MqttCredentials>,

    /// Client id presented to the broker
    pub client_id: String,

    /// Heartbeat publish interval
    pub heartbeat_interval: Duration,

    /// Reconnect backoff
    pub backoff: CooldownOptions,

    /// Consecutive failed connection attempts before giving up
    pub max_connect_attempts: u32,

    /// Telemetry sources
    pub telemetry: TelemetryOptions,

    /// Capture statistics written by the capture daemon
    pub capture_stats_path: PathBuf,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            broker_address: MqttAddress::default(),
            credentials: None,
            client_id: "bmtl-device-01".to_string(),
            heartbeat_interval: Duration::from_secs(60),
            backoff: CooldownOptions::default(),
            max_connect_attempts: DEFAULT_MAX_CONNECT_ATTEMPTS,
            telemetry: TelemetryOptions::default(),
            capture_stats_path: PathBuf::from("/var/lib/bmtl-device/camera_stats.json"),
        }
    }
}

/// Collaborators the worker hands to the dispatcher
#[derive(Clone)]
pub struct Deps {
    pub settings_store: Arc<dyn SettingsStore>,
    pub actuators: Arc<dyn Actuators>,
    pub updates: Arc<dyn UpdateLauncher>,
    pub device_file: File,
}

/// Link status shared with the local status server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LinkStatus {
    pub state: LinkState,
    /// Liveness as observers see it, from our own heartbeat history
    pub liveness: Liveness,
}

impl Default for LinkStatus {
    fn default() -> Self {
        Self {
            state: LinkState::Disconnected,
            liveness: Liveness::Unknown,
        }
    }
}

/// Run the MQTT worker.
///
/// Returns `Ok` after a clean shutdown and an error once the reconnect policy is
/// exhausted, which the caller turns into a nonzero exit.
pub async fn run<S, F>(
    options: &Options,
    topics: Topics,
    deps: Deps,
    mut state: DeviceState,
    status_tx: watch::Sender<LinkStatus>,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) -> Result<(), AgentError>
where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    let module_id = state.identity.module_id.clone();
    let will = Will {
        topic: topics.identity(),
        payload: serde_json::to_vec(&IdentityAnnouncement::offline(&module_id))?,
    };
    let mut client = MqttClient::new(
        &options.broker_address,
        &options.client_id,
        options.credentials.as_ref(),
        will,
    )?;
    let publisher = client.publisher();
    let dispatcher = Dispatcher::new(
        topics.clone(),
        Collaborators {
            publisher: Arc::new(publisher.clone()),
            settings_store: deps.settings_store,
            actuators: deps.actuators,
            updates: deps.updates,
            device_file: deps.device_file,
        },
    );

    let mut fsm = LinkFsm::new(options.max_connect_attempts);
    let mut liveness = LivenessTracker::new(options.heartbeat_interval);
    let mut heartbeat = tokio::time::interval(options.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        "MQTT worker connecting to {}:{} as {}",
        options.broker_address.host, options.broker_address.port, module_id
    );
    transition(&mut fsm, LinkEvent::Connect, &liveness, &module_id, &status_tx);

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("MQTT worker shutting down");
                if fsm.is_connected() {
                    publish_json(&publisher, &topics.identity(), &IdentityAnnouncement::offline(&module_id), true).await;
                    if let Err(e) = client.disconnect().await {
                        debug!("Disconnect failed: {}", e);
                    }
                }
                transition(&mut fsm, LinkEvent::Shutdown, &liveness, &module_id, &status_tx);
                return Ok(());
            }

            event = client.poll() => match event {
                Ok(MqttEvent::Connected) => {
                    transition(&mut fsm, LinkEvent::ConnAck, &liveness, &module_id, &status_tx);
                    if let Err(e) = client.subscribe_all(&topics.subscriptions()).await {
                        error!("Failed to request subscriptions: {}", e);
                    }
                    publish_json(&publisher, &topics.identity(), &IdentityAnnouncement::online(&state), true).await;
                    refresh_state(&mut state, options).await;
                    if publish_json(&publisher, &topics.health(), &HealthReport::from_state(&state), false).await {
                        liveness.record(&module_id, Instant::now());
                    }
                }
                Ok(MqttEvent::Subscribed) => {
                    if fsm.state() == LinkState::Subscribed {
                        info!("MQTT worker subscribed, dispatching commands");
                    }
                    transition(&mut fsm, LinkEvent::SubAck, &liveness, &module_id, &status_tx);
                }
                Ok(MqttEvent::Message(message)) => {
                    // detached handlers finish on their own
                    let _ = dispatcher.handle_message(&mut state, &message.topic, &message.payload).await;
                }
                Ok(MqttEvent::Other) => {}
                Err(e) => {
                    warn!("MQTT connection error: {}", e);
                    transition(&mut fsm, LinkEvent::ConnectionLost(e.to_string()), &liveness, &module_id, &status_tx);
                    if fsm.state() == LinkState::Unrecoverable {
                        error!("Giving up after {} failed connection attempts", fsm.failed_attempts());
                        return Err(AgentError::MqttError(format!(
                            "broker unreachable after {} attempts: {}",
                            fsm.failed_attempts(),
                            e
                        )));
                    }

                    let delay = calc_exp_backoff(&options.backoff, fsm.failed_attempts());
                    debug!("Reconnecting in {:?}", delay);
                    tokio::select! {
                        _ = &mut shutdown_signal => {
                            transition(&mut fsm, LinkEvent::Shutdown, &liveness, &module_id, &status_tx);
                            return Ok(());
                        }
                        _ = sleep_fn(delay) => {}
                    }
                    transition(&mut fsm, LinkEvent::Connect, &liveness, &module_id, &status_tx);
                }
            },

            _ = heartbeat.tick() => {
                if fsm.is_connected() {
                    refresh_state(&mut state, options).await;
                    if publish_json(&publisher, &topics.health(), &HealthReport::from_state(&state), false).await {
                        liveness.record(&module_id, Instant::now());
                    }
                }
                publish_status(&fsm, &liveness, &module_id, &status_tx);
            }
        }
    }
}

fn transition(
    fsm: &mut LinkFsm,
    event: LinkEvent,
    liveness: &LivenessTracker,
    module_id: &str,
    status_tx: &watch::Sender<LinkStatus>,
) {
    let before = fsm.state();
    match fsm.process(event) {
        Ok(after) if after != before => debug!("Link {:?} -> {:?}", before, after),
        Ok(_) => {}
        Err(e) => warn!("{}", e),
    }
    publish_status(fsm, liveness, module_id, status_tx);
}

fn publish_status(
    fsm: &LinkFsm,
    liveness: &LivenessTracker,
    module_id: &str,
    status_tx: &watch::Sender<LinkStatus>,
) {
    status_tx.send_replace(LinkStatus {
        state: fsm.state(),
        liveness: liveness.classify(module_id, Instant::now()),
    });
}

/// Sense telemetry and capture counters into the device state
async fn refresh_state(state: &mut DeviceState, options: &Options) {
    let telemetry_options = options.telemetry.clone();
    match tokio::task::spawn_blocking(move || collect_telemetry(&telemetry_options)).await {
        Ok(telemetry) => state.apply_telemetry(telemetry),
        Err(e) => warn!("Telemetry collection failed: {}", e),
    }
    let stats = read_capture_stats(&File::new(&options.capture_stats_path)).await;
    state.apply_capture_stats(stats);
}

async fn publish_json<T: Serialize>(publisher: &dyn Publisher, topic: &str, value: &T, retain: bool) -> bool {
    let payload = match serde_json::to_vec(value) {
        Ok(payload) => payload,
        Err(e) => {
            error!("Unable to encode message for {}: {}", topic, e);
            return false;
        }
    };
    match publisher.publish(topic, payload, retain).await {
        Ok(()) => true,
        Err(e) => {
            warn!("Unable to publish to {}: {}", topic, e);
            false
        }
    }
}
