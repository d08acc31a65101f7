//! Local configuration and state files

pub mod capture;
pub mod device;
pub mod layout;
pub mod settings;
