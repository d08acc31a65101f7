//! MQTT transport

pub mod client;
pub mod topics;
