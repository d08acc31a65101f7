//! MQTT client implementation

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet, QoS, SubscribeFilter};
use tracing::{debug, info};

use crate::dispatch::dispatcher::Publisher;
use crate::errors::AgentError;

/// Requests buffered between the client handle and the event loop
const REQUEST_CAPACITY: usize = 64;

/// Upper bound for flushing the offline announcement on shutdown
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// MQTT broker address
#[derive(Debug, Clone)]
pub struct MqttAddress {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    /// Optional path to a PEM-encoded CA certificate for broker verification.
    /// When `None` and `use_tls` is `true`, the system certificate store is used.
    pub ca_cert_path: Option<String>,
}

impl Default for MqttAddress {
    fn default() -> Self {
        Self {
            host: "".to_string(),
            port: 8883,
            use_tls: true,
            ca_cert_path: None,
        }
    }
}

/// Broker credentials
#[derive(Clone, Default)]
pub struct MqttCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for MqttCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Message the broker publishes on our behalf after an abnormal disconnect
#[derive(Debug, Clone)]
pub struct Will {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// What one poll of the event loop produced
#[derive(Debug)]
pub enum MqttEvent {
    Connected,
    Subscribed,
    Message(MqttMessage),
    Other,
}

/// MQTT client wrapper
pub struct MqttClient {
    client: AsyncClient,
    eventloop: EventLoop,
}

impl MqttClient {
    /// Create a new MQTT client. The last will is part of the connect packet, so it
    /// is registered before any subscription.
    pub fn new(
        address: &MqttAddress,
        client_id: &str,
        credentials: Option<&MqttCredentials>,
        will: Will,
    ) -> Result<Self, AgentError> {
        if address.host.is_empty() {
            return Err(AgentError::MqttError("MQTT host is not configured".to_string()));
        }

        let mut options = MqttOptions::new(client_id, &address.host, address.port);
        options.set_keep_alive(Duration::from_secs(30));
        options.set_last_will(LastWill::new(will.topic, will.payload, QoS::AtLeastOnce, true));
        if let Some(credentials) = credentials {
            options.set_credentials(&credentials.username, &credentials.password);
        }

        if address.use_tls {
            use rumqttc::{TlsConfiguration, Transport};
            use rustls::ClientConfig;

            let mut root_cert_store = rustls::RootCertStore::empty();

            if let Some(ref ca_path) = address.ca_cert_path {
                let ca_pem = std::fs::read(ca_path)
                    .map_err(|e| AgentError::MqttError(format!("Failed to read CA cert {ca_path}: {e}")))?;
                let mut cursor = std::io::Cursor::new(ca_pem);
                for cert in rustls_pemfile::certs(&mut cursor).flatten() {
                    let _ = root_cert_store.add(cert);
                }
            } else {
                for cert in rustls_native_certs::load_native_certs().unwrap_or_default() {
                    let _ = root_cert_store.add(cert);
                }
            }

            let client_config = ClientConfig::builder()
                .with_root_certificates(root_cert_store)
                .with_no_client_auth();

            options.set_transport(Transport::tls_with_config(TlsConfiguration::Rustls(
                Arc::new(client_config),
            )));
        }

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);

        Ok(Self { client, eventloop })
    }

    /// Handle for publishing from other tasks
    pub fn publisher(&self) -> MqttPublisher {
        MqttPublisher {
            client: self.client.clone(),
        }
    }

    /// Subscribe to every topic in one request
    pub async fn subscribe_all(&mut self, topics: &[String]) -> Result<(), AgentError> {
        let filters = topics
            .iter()
            .map(|topic| SubscribeFilter::new(topic.clone(), QoS::AtLeastOnce))
            .collect::<Vec<_>>();
        self.client
            .subscribe_many(filters)
            .await
            .map_err(|e| AgentError::MqttError(e.to_string()))?;
        info!("Subscribing to {} topics", topics.len());
        Ok(())
    }

    /// Poll for events
    pub async fn poll(&mut self) -> Result<MqttEvent, AgentError> {
        match self.eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                debug!("Received message on topic: {}", publish.topic);
                Ok(MqttEvent::Message(MqttMessage {
                    topic: publish.topic.clone(),
                    payload: publish.payload.to_vec(),
                }))
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("MQTT connected");
                Ok(MqttEvent::Connected)
            }
            Ok(Event::Incoming(Packet::SubAck(_))) => {
                debug!("Subscription acknowledged");
                Ok(MqttEvent::Subscribed)
            }
            Ok(_) => Ok(MqttEvent::Other),
            Err(e) => Err(AgentError::MqttError(e.to_string())),
        }
    }

    /// Disconnect from broker, flushing queued publications first
    pub async fn disconnect(&mut self) -> Result<(), AgentError> {
        self.client
            .disconnect()
            .await
            .map_err(|e| AgentError::MqttError(e.to_string()))?;

        let flushed = tokio::time::timeout(DISCONNECT_TIMEOUT, async {
            loop {
                match self.eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        })
        .await;
        if flushed.is_err() {
            debug!("Broker did not take the disconnect within {:?}", DISCONNECT_TIMEOUT);
        }
        info!("MQTT disconnected");
        Ok(())
    }
}

/// MQTT message
#[derive(Debug, Clone)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Cloneable publishing handle, usable from detached tasks
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
}

#[async_trait]
impl Publisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<(), AgentError> {
        self.client
            .publish(topic, QoS::AtLeastOnce, retain, payload)
            .await
            .map_err(|e| AgentError::MqttError(e.to_string()))
    }
}
