//! Build and (re)start the application on the remote host

use std::time::Duration;

use tracing::{info, warn};

use crate::deploy::compose::ComposeProject;
use crate::deploy::docker::DockerfileProject;
use crate::errors::DeployError;
use crate::models::deployment::{BuildDescriptor, WorkingRepository};
use crate::remote::executor::RemoteExecutor;
use crate::remote::step::{run_step, run_steps, RemoteStep};
use crate::remote::target::RemoteTarget;

/// Runner settings
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    /// Delay before the single retry of a failed container start
    pub start_retry_delay: Duration,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            start_retry_delay: Duration::from_secs(3),
        }
    }
}

/// Picks a strategy from the repository's build descriptor and runs it
pub struct DeploymentRunner<'a> {
    executor: &'a dyn RemoteExecutor,
    settings: &'a RunnerSettings,
}

impl<'a> DeploymentRunner<'a> {
    pub fn new(executor: &'a dyn RemoteExecutor, settings: &'a RunnerSettings) -> Self {
        Self { executor, settings }
    }

    pub async fn run(
        &self,
        target: &RemoteTarget,
        remote_path: &str,
        repo: &WorkingRepository,
        port: u16,
    ) -> Result<(), DeployError> {
        info!("Deploying {} using {}", repo.name, repo.descriptor);
        let (result, diagnostics) = match &repo.descriptor {
            BuildDescriptor::Compose { manifest } => {
                let project = ComposeProject::new(
                    remote_path,
                    repo.compose_project(),
                    manifest.as_str(),
                );
                let result = run_steps(self.executor, target, &project.deploy_steps())
                    .await
                    .map(|_| ());
                (result, project.diagnostic_steps())
            }
            BuildDescriptor::Dockerfile => {
                let project = DockerfileProject::new(remote_path, &repo.slug(), port);
                let result = self.run_dockerfile(target, &project).await;
                (result, project.diagnostic_steps())
            }
        };

        // An unreachable host has nothing to report
        if !matches!(result, Err(DeployError::Connectivity { .. })) {
            self.diagnose(target, &diagnostics).await;
        }
        result
    }

    async fn run_dockerfile(
        &self,
        target: &RemoteTarget,
        project: &DockerfileProject,
    ) -> Result<(), DeployError> {
        run_step(self.executor, target, &project.remove_step()).await?;
        run_step(self.executor, target, &project.build_step()).await?;

        match run_step(self.executor, target, &project.start_step()).await {
            Err(DeployError::Command { exit_code, stderr, .. }) => {
                warn!(
                    exit_code,
                    "Container start failed, retrying once in {:?}: {}",
                    self.settings.start_retry_delay,
                    stderr
                );
                tokio::time::sleep(self.settings.start_retry_delay).await;
                // A failed `docker run` can leave a created container holding the name
                run_step(self.executor, target, &project.remove_step()).await?;
                run_step(self.executor, target, &project.start_step()).await?;
                Ok(())
            }
            other => other.map(|_| ()),
        }
    }

    /// Diagnostics never change the outcome of the run
    async fn diagnose(&self, target: &RemoteTarget, steps: &[RemoteStep]) {
        for step in steps {
            if let Err(e) = run_step(self.executor, target, step).await {
                warn!(step = %step.name, "Diagnostics unavailable: {}", e);
            }
        }
    }
}
