//! Background workers

pub mod heartbeat;
pub mod link;
pub mod mqtt;
