//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::AppState;
use crate::errors::AgentError;
use crate::server::serve::serve;
use crate::server::state::ServerState;
use crate::utils::{now_rfc3339, version_info};
use crate::workers::mqtt::{self, LinkStatus};

/// Run the agent until a shutdown signal arrives or the broker link gives up
pub async fn run(
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), AgentError> {
    info!("Initializing BMTL Agent (build {})...", options.build_hash);

    // Create shutdown channel
    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    let failure_rx = match init(&options, &shutdown_tx, &mut shutdown_manager).await {
        Ok(failure_rx) => failure_rx,
        Err(e) => {
            error!("Failed to start agent: {}", e);
            shutdown_manager.shutdown().await?;
            return Err(e);
        }
    };

    let outcome = tokio::select! {
        _ = shutdown_signal => {
            info!("Shutdown signal received, shutting down...");
            Ok(())
        }
        Some(e) = await_failure(failure_rx) => {
            error!("MQTT link failed permanently: {}", e);
            Err(e)
        }
    };

    drop(shutdown_tx);
    shutdown_manager.shutdown().await?;
    outcome
}

/// Resolves only when the worker reported a fatal error
async fn await_failure(failure_rx: Option<oneshot::Receiver<AgentError>>) -> Option<AgentError> {
    match failure_rx {
        Some(rx) => match rx.await {
            Ok(e) => Some(e),
            Err(_) => std::future::pending().await,
        },
        None => std::future::pending().await,
    }
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: &AppOptions,
    shutdown_tx: &broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<Option<oneshot::Receiver<AgentError>>, AgentError> {
    let app_state = AppState::init(options).await?;
    let (status_tx, status_rx) = watch::channel(LinkStatus::default());

    if options.enable_status_server {
        init_status_server(options, status_rx, shutdown_manager, shutdown_tx.subscribe()).await?;
    }

    if options.mqtt_worker.broker_address.host.is_empty() {
        info!("No MQTT broker configured, remote commands are disabled");
        return Ok(None);
    }

    let failure_rx = init_mqtt_worker(
        options.mqtt_worker.clone(),
        app_state,
        status_tx,
        shutdown_manager,
        shutdown_tx.subscribe(),
    )?;
    Ok(Some(failure_rx))
}

fn init_mqtt_worker(
    options: mqtt::Options,
    app_state: AppState,
    status_tx: watch::Sender<LinkStatus>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<oneshot::Receiver<AgentError>, AgentError> {
    info!("Initializing MQTT worker...");

    let (failure_tx, failure_rx) = oneshot::channel();
    let AppState { device, topics, deps } = app_state;

    let mqtt_handle = tokio::spawn(async move {
        let result = mqtt::run(
            &options,
            topics,
            deps,
            device,
            status_tx,
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
        if let Err(e) = result {
            let _ = failure_tx.send(e);
        }
    });

    shutdown_manager.with_mqtt_worker_handle(mqtt_handle)?;
    Ok(failure_rx)
}

async fn init_status_server(
    options: &AppOptions,
    status_rx: watch::Receiver<LinkStatus>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), AgentError> {
    info!("Initializing local status server...");

    let server_state = ServerState::new(
        options.build_hash.clone(),
        options.slot.clone(),
        now_rfc3339(),
        version_info(),
        status_rx,
    );

    let server_handle = serve(&options.server, Arc::new(server_state), async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    shutdown_manager.with_status_server_handle(server_handle)?;
    Ok(())
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    status_server_handle: Option<JoinHandle<Result<(), AgentError>>>,
    mqtt_worker_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            status_server_handle: None,
            mqtt_worker_handle: None,
        }
    }

    pub fn with_mqtt_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), AgentError> {
        if self.mqtt_worker_handle.is_some() {
            return Err(AgentError::ShutdownError("mqtt_handle already set".to_string()));
        }
        self.mqtt_worker_handle = Some(handle);
        Ok(())
    }

    pub fn with_status_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), AgentError>>,
    ) -> Result<(), AgentError> {
        if self.status_server_handle.is_some() {
            return Err(AgentError::ShutdownError("server_handle already set".to_string()));
        }
        self.status_server_handle = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), AgentError> {
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(
            self.lifecycle_options.max_shutdown_delay,
            self.shutdown_impl(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.lifecycle_options.max_shutdown_delay
                );
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), AgentError> {
        info!("Shutting down BMTL Agent...");

        // 1. MQTT worker publishes the offline identity before disconnecting
        if let Some(handle) = self.mqtt_worker_handle.take() {
            handle.await.map_err(|e| AgentError::ShutdownError(e.to_string()))?;
        }

        // 2. Status server
        if let Some(handle) = self.status_server_handle.take() {
            handle.await.map_err(|e| AgentError::ShutdownError(e.to_string()))??;
        }

        info!("Shutdown complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::layout::StorageLayout;

    #[tokio::test]
    async fn test_run_without_broker_stops_on_signal() {
        let dir = tempfile::tempdir().unwrap();
        let options = AppOptions {
            storage: StorageLayout::new(dir.path()),
            enable_status_server: false,
            ..Default::default()
        };

        run(options, async {}).await.unwrap();
    }
}
