//! Filesystem helpers

pub mod dir;
pub mod file;
pub mod mirror;
