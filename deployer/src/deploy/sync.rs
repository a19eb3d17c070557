//! Mirror the staged checkout to the remote host with rsync

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::errors::DeployError;
use crate::logs::Scrubber;
use crate::models::deployment::WorkingRepository;
use crate::process::capture;
use crate::remote::shell::quote;
use crate::remote::target::RemoteTarget;

/// Excluded from every transfer
pub const VCS_EXCLUDE: &str = ".git";

/// rsync exit codes that mean the remote shell never connected
const RSYNC_CONNECTION_FAILURES: [i32; 2] = [12, 255];

/// Makes a remote directory an exact mirror of a local one
#[async_trait]
pub trait DirectorySync: Send + Sync {
    async fn sync(
        &self,
        repo: &WorkingRepository,
        target: &RemoteTarget,
        remote_path: &str,
    ) -> Result<(), DeployError>;
}

pub struct RsyncTransfer {
    scrubber: Arc<Scrubber>,
}

impl RsyncTransfer {
    pub fn new(scrubber: Arc<Scrubber>) -> Self {
        Self { scrubber }
    }

    /// Arguments for a mirror of `local` into `remote_path`.
    ///
    /// Both sides end with `/` so the directory contents are mirrored rather
    /// than nesting the directory inside itself.
    pub fn rsync_args(local: &Path, target: &RemoteTarget, remote_path: &str) -> Vec<String> {
        let ssh = std::iter::once("ssh".to_string())
            .chain(target.ssh_options(None).iter().map(|o| quote(o)))
            .collect::<Vec<_>>()
            .join(" ");
        vec![
            "-az".to_string(),
            "--delete".to_string(),
            format!("--exclude={}", VCS_EXCLUDE),
            "-e".to_string(),
            ssh,
            format!("{}/", local.display().to_string().trim_end_matches('/')),
            format!(
                "{}:{}/",
                target.destination(),
                remote_path.trim_end_matches('/')
            ),
        ]
    }
}

#[async_trait]
impl DirectorySync for RsyncTransfer {
    async fn sync(
        &self,
        repo: &WorkingRepository,
        target: &RemoteTarget,
        remote_path: &str,
    ) -> Result<(), DeployError> {
        info!(
            "Syncing {} to {}:{}",
            repo.path.display(),
            target.host,
            remote_path
        );
        let args = Self::rsync_args(&repo.path, target, remote_path);
        debug!("rsync {}", args.join(" "));

        let mut cmd = Command::new("rsync");
        cmd.args(&args);
        let output = capture(cmd, None, &self.scrubber).await?;

        if RSYNC_CONNECTION_FAILURES.contains(&output.exit_code) {
            return Err(DeployError::Connectivity {
                host: target.host.clone(),
                message: output.stderr.trim().to_string(),
            });
        }
        if !output.success() {
            return Err(DeployError::command("rsync", output.exit_code, &output.stderr));
        }
        info!("Sync complete");
        Ok(())
    }
}
