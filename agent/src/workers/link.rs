//! Finite state machine for the broker link

use serde::{Deserialize, Serialize};

/// Default number of consecutive failed connection attempts before giving up
pub const DEFAULT_MAX_CONNECT_ATTEMPTS: u32 = 10;

/// Link state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    /// No connection, waiting to (re)connect
    Disconnected,

    /// Connect packet sent, waiting for the broker
    Connecting,

    /// Connected, subscriptions requested
    Subscribed,

    /// Subscriptions acknowledged, handling commands (steady state)
    Dispatching,

    /// Clean shutdown
    Terminated,

    /// Reconnect policy exhausted
    Unrecoverable,
}

/// Link event
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// Start a connection attempt
    Connect,

    /// Broker accepted the connection
    ConnAck,

    /// Broker acknowledged the subscriptions
    SubAck,

    /// Connection attempt failed or an established connection dropped
    ConnectionLost(String),

    /// Shutdown requested
    Shutdown,
}

/// Broker link FSM
#[derive(Debug, Clone)]
pub struct LinkFsm {
    state: LinkState,
    error: Option<String>,
    failed_attempts: u32,
    max_attempts: u32,
}

impl LinkFsm {
    /// Create a new FSM in disconnected state
    pub fn new(max_attempts: u32) -> Self {
        Self {
            state: LinkState::Disconnected,
            error: None,
            failed_attempts: 0,
            max_attempts,
        }
    }

    /// Get current state
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Get the last connection error if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Consecutive failed connection attempts
    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, LinkState::Subscribed | LinkState::Dispatching)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, LinkState::Terminated | LinkState::Unrecoverable)
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: LinkEvent) -> Result<LinkState, String> {
        let new_state = match (&self.state, &event) {
            // From Disconnected
            (LinkState::Disconnected, LinkEvent::Connect) => LinkState::Connecting,

            // From Connecting
            (LinkState::Connecting, LinkEvent::ConnAck) => {
                self.error = None;
                self.failed_attempts = 0;
                LinkState::Subscribed
            }
            (LinkState::Connecting, LinkEvent::ConnectionLost(err)) => {
                self.error = Some(err.clone());
                self.failed_attempts += 1;
                if self.failed_attempts >= self.max_attempts {
                    LinkState::Unrecoverable
                } else {
                    LinkState::Disconnected
                }
            }

            // From Subscribed
            (LinkState::Subscribed, LinkEvent::SubAck) => LinkState::Dispatching,

            // An established link dropping is not a failed attempt
            (LinkState::Subscribed | LinkState::Dispatching, LinkEvent::ConnectionLost(err)) => {
                self.error = Some(err.clone());
                LinkState::Disconnected
            }

            // Later SubAcks (resubscriptions) keep the steady state
            (LinkState::Dispatching, LinkEvent::SubAck) => LinkState::Dispatching,

            // Shutdown from any live state
            (
                LinkState::Disconnected | LinkState::Connecting | LinkState::Subscribed | LinkState::Dispatching,
                LinkEvent::Shutdown,
            ) => LinkState::Terminated,

            // Invalid transitions
            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        self.state = new_state;
        Ok(new_state)
    }
}

impl Default for LinkFsm {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONNECT_ATTEMPTS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_transitions() {
        let mut fsm = LinkFsm::default();
        assert_eq!(fsm.state(), LinkState::Disconnected);

        fsm.process(LinkEvent::Connect).unwrap();
        assert_eq!(fsm.state(), LinkState::Connecting);

        fsm.process(LinkEvent::ConnAck).unwrap();
        assert_eq!(fsm.state(), LinkState::Subscribed);

        fsm.process(LinkEvent::SubAck).unwrap();
        assert_eq!(fsm.state(), LinkState::Dispatching);
        assert!(fsm.is_connected());

        fsm.process(LinkEvent::ConnectionLost("reset".to_string())).unwrap();
        assert_eq!(fsm.state(), LinkState::Disconnected);
        assert_eq!(fsm.failed_attempts(), 0);
        assert_eq!(fsm.error(), Some("reset"));
    }

    #[test]
    fn test_failed_attempts_reset_on_connack() {
        let mut fsm = LinkFsm::new(3);
        for _ in 0..2 {
            fsm.process(LinkEvent::Connect).unwrap();
            fsm.process(LinkEvent::ConnectionLost("refused".to_string())).unwrap();
        }
        assert_eq!(fsm.failed_attempts(), 2);

        fsm.process(LinkEvent::Connect).unwrap();
        fsm.process(LinkEvent::ConnAck).unwrap();
        assert_eq!(fsm.failed_attempts(), 0);
        assert!(fsm.error().is_none());
    }
}
