//! BMTL Agent Library
//!
//! Remote-control agent for BMTL time-lapse camera devices: blue/green release
//! management, a launcher that picks the authoritative release, and an MQTT command
//! dispatcher with heartbeats.

pub mod app;
pub mod dispatch;
pub mod errors;
pub mod filesys;
pub mod hardware;
pub mod launcher;
pub mod logs;
pub mod mqtt;
pub mod release;
pub mod server;
pub mod shell;
pub mod storage;
pub mod telemetry;
pub mod utils;
pub mod workers;
