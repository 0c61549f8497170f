//! Execution of external commands.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::command::HypervisorCommand;
use crate::error::{ProvisionError, Result};

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` if the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(exit_code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Convert a non-zero exit into a `Hypervisor` error.
    pub fn check(self, cmd: &HypervisorCommand) -> Result<String> {
        if self.is_success() {
            Ok(self.stdout)
        } else {
            Err(ProvisionError::Hypervisor {
                command: cmd.to_string(),
                exit_code: self.exit_code,
                stderr: self.stderr,
            })
        }
    }
}

/// Runs external commands to completion.
///
/// Implementations return `Err` only when the command could not be run at
/// all; a non-zero exit is reported through [`CommandOutput`].
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, cmd: &HypervisorCommand) -> Result<CommandOutput>;

    /// Run and require success; returns stdout.
    async fn run_checked(&self, cmd: &HypervisorCommand) -> Result<String> {
        self.run(cmd).await?.check(cmd)
    }
}

/// Runs commands as child processes and waits for them.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, cmd: &HypervisorCommand) -> Result<CommandOutput> {
        debug!(command = %cmd, "Executing");

        let output = Command::new(cmd.program())
            .args(cmd.args())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ProvisionError::Hypervisor {
                command: cmd.to_string(),
                exit_code: None,
                stderr: format!("failed to spawn {}: {e}", cmd.program()),
            })?;

        let result = CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        debug!(
            command = %cmd.key(),
            exit_code = ?result.exit_code,
            stdout_bytes = result.stdout.len(),
            "Command finished"
        );

        Ok(result)
    }
}
