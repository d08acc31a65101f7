//! Supervised services around promotion

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::errors::AgentError;
use crate::server::handlers::HealthResponse;
use crate::shell::run_shell;

/// Upper bound for services to become healthy after a promotion
pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(60);

/// Delay between health probes
pub const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Host process supervisor as seen by the release manager
#[async_trait]
pub trait ServiceControl: Send + Sync {
    /// Stop every dependent service
    async fn stop(&self) -> Result<(), AgentError>;

    /// Start every dependent service
    async fn start(&self) -> Result<(), AgentError>;

    /// Whether all services are running and, when given, report `expected_build`
    async fn is_healthy(&self, expected_build: Option<&str>) -> bool;
}

/// Poll until healthy or until [`HEALTH_TIMEOUT`] elapses
pub async fn verify_health<S>(services: &S, expected_build: Option<&str>) -> Result<(), AgentError>
where
    S: ServiceControl + ?Sized,
{
    let deadline = tokio::time::Instant::now() + HEALTH_TIMEOUT;
    loop {
        if services.is_healthy(expected_build).await {
            info!("Services healthy (build {})", expected_build.unwrap_or("any"));
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(AgentError::HealthCheckError(format!(
                "services did not become healthy with build {} within {:?}",
                expected_build.unwrap_or("any"),
                HEALTH_TIMEOUT
            )));
        }
        tokio::time::sleep(HEALTH_POLL_INTERVAL).await;
    }
}

/// systemd units plus an optional probe of the agent's local status server
pub struct SystemdServices {
    units: Vec<String>,
    status_url: Option<url::Url>,
    http: reqwest::Client,
}

impl SystemdServices {
    pub fn new(units: Vec<String>, status_url: Option<&str>) -> Result<Self, AgentError> {
        let status_url = status_url
            .map(|raw| {
                url::Url::parse(raw)
                    .and_then(|base| base.join("health"))
                    .map_err(|e| AgentError::ConfigError(format!("invalid status url {raw}: {e}")))
            })
            .transpose()?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            units,
            status_url,
            http,
        })
    }

    async fn systemctl(&self, action: &str) -> Result<(), AgentError> {
        for unit in &self.units {
            let output = run_shell(&format!("systemctl {action} {unit}"), None, &[]).await?;
            if !output.success {
                return Err(AgentError::ReleaseError(format!(
                    "systemctl {action} {unit} failed: {}",
                    output.summary()
                )));
            }
            info!("systemctl {} {}", action, unit);
        }
        Ok(())
    }

    async fn reported_build(&self, url: &url::Url) -> Option<String> {
        let response = self.http.get(url.clone()).send().await.ok()?;
        if response.status() != http::StatusCode::OK {
            debug!("Status server answered {}", response.status());
            return None;
        }
        response
            .json::<HealthResponse>()
            .await
            .ok()
            .map(|health| health.build_hash)
    }
}

#[async_trait]
impl ServiceControl for SystemdServices {
    async fn stop(&self) -> Result<(), AgentError> {
        self.systemctl("stop").await
    }

    async fn start(&self) -> Result<(), AgentError> {
        self.systemctl("start").await
    }

    async fn is_healthy(&self, expected_build: Option<&str>) -> bool {
        for unit in &self.units {
            match run_shell(&format!("systemctl is-active --quiet {unit}"), None, &[]).await {
                Ok(output) if output.success => {}
                Ok(_) => {
                    debug!("{} is not active yet", unit);
                    return false;
                }
                Err(e) => {
                    warn!("Unable to query {}: {}", unit, e);
                    return false;
                }
            }
        }

        let (Some(url), Some(expected)) = (self.status_url.as_ref(), expected_build) else {
            return true;
        };
        match self.reported_build(url).await {
            Some(reported) if reported == expected => true,
            Some(reported) => {
                debug!("Running build {} does not match expected {}", reported, expected);
                false
            }
            None => false,
        }
    }
}
