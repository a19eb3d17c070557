//! Remote command execution over ssh

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::errors::DeployError;
use crate::logs::Scrubber;
use crate::process::{capture, CommandOutput};
use crate::remote::target::RemoteTarget;

/// Exit status ssh reserves for its own connection failures
pub const SSH_CONNECTION_FAILURE: i32 = 255;

/// stderr fragments ssh prints when it, not the remote command, gave up
const SSH_FAILURE_MARKERS: [&str; 8] = [
    "ssh: ",
    "Connection closed by",
    "Connection reset by",
    "Connection timed out",
    "Permission denied (",
    "Host key verification failed",
    "kex_exchange_identification",
    "Could not resolve hostname",
];

/// A remote command may exit 255 itself; only ssh's own messages make it a
/// connection failure.
pub fn is_connection_failure(output: &CommandOutput) -> bool {
    output.exit_code == SSH_CONNECTION_FAILURE
        && SSH_FAILURE_MARKERS
            .iter()
            .any(|marker| output.stderr.contains(marker))
}

/// Executes commands and scripts on a remote host.
///
/// A command that runs and exits non-zero is `Ok` with the exit code in the
/// output; whether that is fatal is decided by the caller (see
/// [`crate::remote::step`]). `Err` is reserved for failing to reach the host.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run a single shell command line
    async fn execute(&self, target: &RemoteTarget, command: &str)
        -> Result<CommandOutput, DeployError>;

    /// Pipe a multi-line script to a remote `bash -s`
    async fn execute_script(
        &self,
        target: &RemoteTarget,
        script: &str,
    ) -> Result<CommandOutput, DeployError>;

    /// Check that the host accepts a connection within `timeout`
    async fn probe(&self, target: &RemoteTarget, timeout: Duration) -> Result<(), DeployError>;
}

/// Production executor shelling out to the system `ssh` client
pub struct SshExecutor {
    scrubber: Arc<Scrubber>,
}

impl SshExecutor {
    pub fn new(scrubber: Arc<Scrubber>) -> Self {
        Self { scrubber }
    }

    async fn run_ssh(
        &self,
        target: &RemoteTarget,
        remote_command: &str,
        input: Option<&str>,
        connect_timeout: Option<Duration>,
    ) -> Result<CommandOutput, DeployError> {
        let mut cmd = Command::new("ssh");
        cmd.args(target.ssh_options(connect_timeout))
            .arg(target.destination())
            .arg(remote_command);

        let output = capture(cmd, input, &self.scrubber)
            .await
            .map_err(|e| DeployError::Connectivity {
                host: target.host.clone(),
                message: format!("failed to run ssh: {}", e),
            })?;

        if is_connection_failure(&output) {
            return Err(DeployError::Connectivity {
                host: target.host.clone(),
                message: output.stderr.trim().to_string(),
            });
        }
        Ok(output)
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn execute(
        &self,
        target: &RemoteTarget,
        command: &str,
    ) -> Result<CommandOutput, DeployError> {
        debug!(host = %target.host, command = %self.scrubber.scrub(command), "ssh exec");
        self.run_ssh(target, command, None, None).await
    }

    async fn execute_script(
        &self,
        target: &RemoteTarget,
        script: &str,
    ) -> Result<CommandOutput, DeployError> {
        debug!(host = %target.host, lines = script.lines().count(), "ssh script");
        let body = format!("set -e\n{}\n", script);
        self.run_ssh(target, "bash -s", Some(&body), None).await
    }

    async fn probe(&self, target: &RemoteTarget, timeout: Duration) -> Result<(), DeployError> {
        let attempt = self.run_ssh(target, "true", None, Some(timeout));
        // ConnectTimeout only bounds the TCP connect; the outer timeout
        // also covers a stalled handshake.
        match tokio::time::timeout(timeout * 2, attempt).await {
            Ok(Ok(output)) if output.success() => Ok(()),
            Ok(Ok(output)) => Err(DeployError::Connectivity {
                host: target.host.clone(),
                message: format!(
                    "probe exited with {}: {}",
                    output.exit_code,
                    output.stderr.trim()
                ),
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(DeployError::Connectivity {
                host: target.host.clone(),
                message: format!("timed out after {}s", (timeout * 2).as_secs()),
            }),
        }
    }
}
