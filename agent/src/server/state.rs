//! Server state

use tokio::sync::watch;

use crate::utils::VersionInfo;
use crate::workers::mqtt::LinkStatus;

/// Server state shared across handlers
pub struct ServerState {
    /// Build hash the runtime was started with
    pub build_hash: String,
    /// Slot label (`a`/`b`) when started from a release slot
    pub slot: Option<String>,
    pub started_at: String,
    pub version: VersionInfo,
    pub link: watch::Receiver<LinkStatus>,
}

impl ServerState {
    pub fn new(
        build_hash: String,
        slot: Option<String>,
        started_at: String,
        version: VersionInfo,
        link: watch::Receiver<LinkStatus>,
    ) -> Self {
        Self {
            build_hash,
            slot,
            started_at,
            version,
            link,
        }
    }
}
