//! Shell command execution
//!
//! Provisioning, validation, actuators and the update launcher are all declared as
//! shell command lines in the settings file and run through `sh -c`.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use crate::errors::AgentError;

/// Captured result of a finished command
#[derive(Debug, Clone)]
pub struct ShellOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ShellOutput {
    /// Last non-empty stderr line, or stdout when stderr is silent
    pub fn summary(&self) -> String {
        let last_line = |s: &str| {
            s.lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .map(|l| l.trim().to_string())
        };
        last_line(&self.stderr)
            .or_else(|| last_line(&self.stdout))
            .unwrap_or_else(|| format!("exit code {:?}", self.code))
    }
}

/// Run a command line to completion, capturing its output
pub async fn run_shell(
    command_line: &str,
    cwd: Option<&Path>,
    envs: &[(&str, &str)],
) -> Result<ShellOutput, AgentError> {
    debug!("Running command: {}", command_line);

    let mut command = Command::new("sh");
    command.args(["-c", command_line]).stdin(Stdio::null());
    if let Some(cwd) = cwd {
        command.current_dir(cwd);
    }
    for (key, value) in envs {
        command.env(key, value);
    }

    let output = command
        .output()
        .await
        .map_err(|e| AgentError::Internal(format!("Failed to run `{command_line}`: {e}")))?;

    Ok(ShellOutput {
        success: output.status.success(),
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

/// Start a command line without waiting for it
pub fn spawn_shell(command_line: &str) -> Result<(), AgentError> {
    debug!("Spawning command: {}", command_line);

    let mut child = Command::new("sh")
        .args(["-c", command_line])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| AgentError::Internal(format!("Failed to spawn `{command_line}`: {e}")))?;

    // reap the child so it never lingers as a zombie
    tokio::spawn(async move {
        let _ = child.wait().await;
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_shell_captures_output() {
        let output = run_shell("echo hello; echo oops >&2; exit 3", None, &[])
            .await
            .unwrap();
        assert!(!output.success);
        assert_eq!(output.code, Some(3));
        assert_eq!(output.stdout.trim(), "hello");
        assert_eq!(output.summary(), "oops");
    }

    #[tokio::test]
    async fn test_run_shell_cwd_and_env() {
        let dir = tempfile::tempdir().unwrap();
        let output = run_shell("pwd; echo $BMTL_SLOT", Some(dir.path()), &[("BMTL_SLOT", "b")])
            .await
            .unwrap();
        assert!(output.success);
        let lines: Vec<&str> = output.stdout.lines().collect();
        assert_eq!(
            std::fs::canonicalize(lines[0]).unwrap(),
            std::fs::canonicalize(dir.path()).unwrap()
        );
        assert_eq!(lines[1], "b");
    }
}
