//! Source staging with git
//!
//! The access token reaches git only through a credential helper that reads
//! it from the child's environment, so it never appears in a URL, on a
//! command line or in `.git/config`.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::app::options::DeploymentConfig;
use crate::errors::DeployError;
use crate::filesys::dir::Dir;
use crate::logs::Scrubber;
use crate::models::deployment::{BuildDescriptor, WorkingRepository};
use crate::process::{capture, CommandOutput};
use crate::storage::layout::StorageLayout;

/// Environment variable carrying the token to the credential helper
const TOKEN_ENV: &str = "AJDEPLOY_GIT_TOKEN";

const CREDENTIAL_HELPER: &str = "!f() { test \"$1\" = get || return 0; \
echo username=x-access-token; echo \"password=${AJDEPLOY_GIT_TOKEN}\"; }; f";

/// Resolves and stages application source into a local working directory
#[async_trait]
pub trait SourceStage: Send + Sync {
    async fn stage(&self, config: &DeploymentConfig) -> Result<WorkingRepository, DeployError>;
}

/// Stages repositories under the local staging root using the `git` CLI
pub struct GitStager {
    layout: StorageLayout,
    scrubber: Arc<Scrubber>,
}

impl GitStager {
    pub fn new(layout: StorageLayout, scrubber: Arc<Scrubber>) -> Self {
        Self { layout, scrubber }
    }

    fn command(&self, cwd: Option<&Path>, token: &SecretString, args: &[&str]) -> Command {
        let mut cmd = Command::new("git");
        // Reset inherited helpers first so ours is the only one consulted
        cmd.args(["-c", "credential.helper="])
            .arg("-c")
            .arg(format!("credential.helper={}", CREDENTIAL_HELPER))
            .args(args)
            .env(TOKEN_ENV, token.expose_secret())
            .env("GIT_TERMINAL_PROMPT", "0");
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        cmd
    }

    async fn git(
        &self,
        cwd: Option<&Path>,
        token: &SecretString,
        args: &[&str],
    ) -> Result<CommandOutput, DeployError> {
        debug!("git {}", args.join(" "));
        let output = capture(self.command(cwd, token, args), None, &self.scrubber).await?;
        Ok(output)
    }

    /// Run git and turn a non-zero exit into a command error
    async fn git_checked(
        &self,
        step: &str,
        cwd: Option<&Path>,
        token: &SecretString,
        args: &[&str],
    ) -> Result<CommandOutput, DeployError> {
        let output = self.git(cwd, token, args).await?;
        if !output.success() {
            return Err(DeployError::command(step, output.exit_code, &output.stderr));
        }
        Ok(output)
    }

    async fn update(&self, dir: &Dir, config: &DeploymentConfig) -> Result<(), DeployError> {
        let path = Some(dir.path());
        let token = &config.token;
        let branch = config.branch.as_str();
        info!("Updating existing checkout in {}", dir.path().display());

        self.git_checked(
            "git remote set-url",
            path,
            token,
            &["remote", "set-url", "origin", &config.repo_url],
        )
        .await?;
        self.git_checked("git fetch", path, token, &["fetch", "--prune", "origin"])
            .await?;

        let local_ref = format!("refs/heads/{}", branch);
        let has_local = self
            .git(path, token, &["rev-parse", "--verify", "--quiet", &local_ref])
            .await?
            .success();
        if has_local {
            self.git_checked("git checkout", path, token, &["checkout", branch])
                .await?;
        } else {
            let upstream = format!("origin/{}", branch);
            self.git_checked(
                "git checkout",
                path,
                token,
                &["checkout", "-b", branch, "--track", &upstream],
            )
            .await?;
        }

        // The checkout may already be current; a failed pull does not stop the run
        let pull = self
            .git(path, token, &["pull", "--ff-only", "origin", branch])
            .await?;
        if !pull.success() {
            warn!(
                exit_code = pull.exit_code,
                "git pull failed, continuing with the current checkout: {}",
                pull.stderr.trim()
            );
        }
        Ok(())
    }

    async fn clone(&self, dir: &Dir, config: &DeploymentConfig) -> Result<(), DeployError> {
        info!(
            "Cloning {} (branch: {}) into {}",
            config.repo_url,
            config.branch,
            dir.path().display()
        );
        let target = dir.path().to_string_lossy().to_string();
        self.git_checked(
            "git clone",
            None,
            &config.token,
            &["clone", "--branch", &config.branch, &config.repo_url, &target],
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl SourceStage for GitStager {
    async fn stage(&self, config: &DeploymentConfig) -> Result<WorkingRepository, DeployError> {
        let name = WorkingRepository::name_from_url(&config.repo_url)?;
        self.layout.staging_dir().create().await?;
        let dir = self.layout.repository_dir(&name);

        if dir.subdir(".git").exists().await {
            self.update(&dir, config).await?;
        } else {
            self.clone(&dir, config).await?;
        }

        let descriptor = BuildDescriptor::detect(&dir)
            .await
            .ok_or_else(|| DeployError::BuildDescriptorMissing(dir.path().to_path_buf()))?;
        info!("Staged {} with build descriptor: {}", name, descriptor);

        Ok(WorkingRepository {
            name,
            path: dir.path().to_path_buf(),
            descriptor,
        })
    }
}
