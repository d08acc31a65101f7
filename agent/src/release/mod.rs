//! Blue/green release management
//!
//! Two release slots under one install root, an atomically replaced `current`
//! pointer naming the authoritative slot, a backup used for rollback, and an
//! update lock serializing writers.

pub mod lock;
pub mod manager;
pub mod pointer;
pub mod services;
pub mod slots;
pub mod source;
pub mod trigger;
