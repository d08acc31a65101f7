//! Error types for the BMTL agent

use thiserror::Error;

/// Main error type for the BMTL agent
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Sync error: {0}")]
    SyncError(String),

    #[error("Release error: {0}")]
    ReleaseError(String),

    #[error("Provisioning failed: {0}")]
    ProvisionError(String),

    #[error("Slot validation failed: {0}")]
    SlotValidationError(String),

    #[error("Health verification failed: {0}")]
    HealthCheckError(String),

    #[error("Slot configuration corrupted: {0}")]
    SlotCorruption(String),

    #[error("Source and target collide: {0}")]
    PathCollision(String),

    #[error("Update lock held: {0}")]
    LockHeld(String),

    #[error("Update cancelled: {0}")]
    Cancelled(String),

    #[error("No runnable runtime: {0}")]
    NoRuntime(String),

    #[error("Exec failed: {0}")]
    ExecError(String),

    #[error("MQTT error: {0}")]
    MqttError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Hardware error: {0}")]
    HardwareError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AgentError {
    /// Errors that require an operator to repair the install root by hand
    pub fn is_corruption(&self) -> bool {
        matches!(self, AgentError::SlotCorruption(_) | AgentError::PathCollision(_))
    }
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        AgentError::Internal(err.to_string())
    }
}

impl From<walkdir::Error> for AgentError {
    fn from(err: walkdir::Error) -> Self {
        AgentError::SyncError(err.to_string())
    }
}
