//! Starting a release manager from the running agent
//!
//! The release manager stops the agent's own service, so it has to run outside
//! the agent's process tree. The default launcher asks systemd for a transient unit.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::info;

use crate::errors::AgentError;
use crate::release::manager::UpdateMode;
use crate::shell::spawn_shell;

/// Starts a release manager process for the given mode
#[async_trait]
pub trait UpdateLauncher: Send + Sync {
    async fn launch(&self, mode: UpdateMode) -> Result<(), AgentError>;
}

/// Runs a command template with `{mode}` and `{exe}` substituted
pub struct CommandUpdateLauncher {
    template: String,
    exe: PathBuf,
    settings_arg: Option<String>,
}

impl CommandUpdateLauncher {
    pub fn new(template: &str, exe: PathBuf, settings_arg: Option<String>) -> Self {
        Self {
            template: template.to_string(),
            exe,
            settings_arg,
        }
    }

    pub fn command_line(&self, mode: UpdateMode) -> String {
        let mut command_line = self
            .template
            .replace("{mode}", mode.as_str())
            .replace("{exe}", &self.exe.to_string_lossy());
        if let Some(settings) = &self.settings_arg {
            command_line.push_str(&format!(" --settings={settings}"));
        }
        command_line
    }
}

#[async_trait]
impl UpdateLauncher for CommandUpdateLauncher {
    async fn launch(&self, mode: UpdateMode) -> Result<(), AgentError> {
        let command_line = self.command_line(mode);
        info!("Starting release manager: {}", command_line);
        spawn_shell(&command_line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line_substitution() {
        let launcher = CommandUpdateLauncher::new(
            "systemd-run --collect --unit bmtl-agent-{mode} {exe} --{mode}",
            PathBuf::from("/opt/bmtl-device/slot_a/env/bin/bmtl-agent"),
            Some("/etc/bmtl-device/settings.json".to_string()),
        );
        assert_eq!(
            launcher.command_line(UpdateMode::Revert),
            "systemd-run --collect --unit bmtl-agent-revert /opt/bmtl-device/slot_a/env/bin/bmtl-agent --revert --settings=/etc/bmtl-device/settings.json"
        );
    }
}
