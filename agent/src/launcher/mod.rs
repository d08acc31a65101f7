//! Launcher
//!
//! Runs at every service start. Waits a bounded time for an in-progress update,
//! resolves the runtime to start, and replaces itself with it. The started runtime
//! is pinned to the canonical slot directory rather than the `current` link, so a
//! promotion during startup cannot change the code it is running from.

pub mod resolve;

use std::os::unix::process::CommandExt;
use std::time::Duration;

use tracing::{info, warn};

use crate::errors::AgentError;
use crate::filesys::file::File;
use crate::launcher::resolve::{resolve_runtime, LaunchTarget};
use crate::release::lock::{is_locked, wait_for_release};
use crate::release::slots::ReleaseLayout;

/// Longest wait for an update lock before launching anyway
pub const LOCK_WAIT_CAP: Duration = Duration::from_secs(30);

/// Lock polling interval
pub const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Exit code when no runtime can be found anywhere
pub const EXIT_NO_RUNTIME: i32 = 3;

/// Wait out a concurrent update (bounded), then resolve the runtime
pub async fn prepare_launch(
    layout: &ReleaseLayout,
    system_runtime: &File,
) -> Result<LaunchTarget, AgentError> {
    let lock = layout.lock_file();
    if is_locked(&lock) {
        info!("Update in progress, waiting up to {:?} for it to finish", LOCK_WAIT_CAP);
        let released = wait_for_release(&lock, LOCK_WAIT_CAP, LOCK_POLL_INTERVAL, tokio::time::sleep).await;
        if !released {
            warn!(
                "Update lock still held after {:?}, launching the current release anyway",
                LOCK_WAIT_CAP
            );
        }
    }

    resolve_runtime(layout, system_runtime).await
}

/// Replace this process with the resolved runtime.
///
/// Only returns when the exec itself failed.
pub fn exec_runtime(target: &LaunchTarget, forward_args: &[String]) -> AgentError {
    let mut command = std::process::Command::new(&target.runtime);
    command.arg("--run").args(forward_args);

    match (&target.release_dir, target.slot) {
        (Some(release_dir), Some(slot)) => {
            command
                .current_dir(release_dir)
                .env("BMTL_RELEASE_DIR", release_dir)
                .env("BMTL_SLOT", slot.label());
        }
        _ => {
            command.env_remove("BMTL_RELEASE_DIR").env_remove("BMTL_SLOT");
        }
    }

    info!(
        "Launching {} ({:?})",
        target.runtime.display(),
        target.resolution
    );
    let err = command.exec();
    AgentError::ExecError(format!("{}: {}", target.runtime.display(), err))
}
