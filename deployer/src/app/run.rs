//! Deployment run: drives every stage in order and stops at the first fatal error

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use colored::Colorize;
use tracing::{error, info, warn};

use crate::app::options::DeploymentConfig;
use crate::deploy::fsm::{RunEvent, RunFsm, RunStage};
use crate::deploy::git::SourceStage;
use crate::deploy::provision::provision;
use crate::deploy::proxy::configure;
use crate::deploy::runner::{DeploymentRunner, RunnerSettings};
use crate::deploy::sync::DirectorySync;
use crate::deploy::validate::{validate, ExternalProbe};
use crate::errors::{DeployError, EXIT_SUCCESS};
use crate::models::deployment::{ProxyRoute, ValidationReport, WorkingRepository};
use crate::remote::executor::RemoteExecutor;
use crate::remote::target::{RemoteTarget, PROBE_TIMEOUT};
use crate::storage::layout::RemoteLayout;

/// What a run achieved, whether or not it finished
#[derive(Debug, Default)]
pub struct RunSummary {
    pub stage: RunStage,
    pub failed_at: Option<RunStage>,
    pub repository: Option<WorkingRepository>,
    pub route: Option<ProxyRoute>,
    pub report: Option<ValidationReport>,
    pub error: Option<DeployError>,
    pub log_path: Option<PathBuf>,
}

impl RunSummary {
    pub fn with_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    pub fn exit_code(&self) -> i32 {
        self.error.as_ref().map_or(EXIT_SUCCESS, DeployError::exit_code)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.error, self.failed_at) {
            (None, _) => writeln!(f, "{}", "Deployment completed".green().bold())?,
            (Some(DeployError::Interrupted), stage) => writeln!(
                f,
                "{} while {}",
                "Deployment interrupted".yellow().bold(),
                stage.unwrap_or(self.stage)
            )?,
            (Some(e), stage) => writeln!(
                f,
                "{} while {}: {}",
                "Deployment failed".red().bold(),
                stage.unwrap_or(self.stage),
                e
            )?,
        }
        if let Some(repo) = &self.repository {
            writeln!(f, "  repository: {} ({})", repo.name, repo.descriptor)?;
        }
        if let Some(route) = &self.route {
            writeln!(
                f,
                "  proxy: port {} -> {}",
                route.public_port,
                route.upstream()
            )?;
        }
        if let Some(report) = &self.report {
            writeln!(f, "  validation:")?;
            write!(f, "{}", report)?;
        }
        if let Some(path) = &self.log_path {
            writeln!(f, "  log: {}", path.display())?;
        }
        Ok(())
    }
}

/// Sequences the deployment components for a single run
pub struct Orchestrator {
    stager: Arc<dyn SourceStage>,
    executor: Arc<dyn RemoteExecutor>,
    sync: Arc<dyn DirectorySync>,
    prober: Arc<dyn ExternalProbe>,
    settings: RunnerSettings,
    fsm: RunFsm,
}

impl Orchestrator {
    pub fn new(
        stager: Arc<dyn SourceStage>,
        executor: Arc<dyn RemoteExecutor>,
        sync: Arc<dyn DirectorySync>,
        prober: Arc<dyn ExternalProbe>,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            stager,
            executor,
            sync,
            prober,
            settings,
            fsm: RunFsm::new(),
        }
    }

    /// Run every stage, or stop early on a fatal error or `shutdown`.
    ///
    /// On interrupt the in-flight step is dropped, which kills its child
    /// process; state from completed steps is left in place.
    pub async fn run(
        &mut self,
        config: &DeploymentConfig,
        shutdown: impl Future<Output = ()>,
    ) -> RunSummary {
        let mut summary = RunSummary::default();

        let result = tokio::select! {
            result = self.execute(config, &mut summary) => result,
            _ = shutdown => Err(DeployError::Interrupted),
        };

        if let Err(e) = result {
            let event = match e {
                DeployError::Interrupted => {
                    warn!(stage = %self.fsm.stage(), "Interrupted, stopping without cleanup");
                    RunEvent::Interrupt
                }
                ref fatal => {
                    error!(stage = %self.fsm.stage(), "Deployment failed: {}", fatal);
                    if fatal.is_precondition() {
                        info!("No changes were made on {}", config.remote_host);
                    }
                    RunEvent::Fail
                }
            };
            if let Err(invalid) = self.fsm.process(event) {
                error!("{}", invalid);
            }
            summary.error = Some(e);
        }

        summary.stage = self.fsm.stage();
        summary.failed_at = self.fsm.failed_at();
        summary
    }

    async fn execute(
        &mut self,
        config: &DeploymentConfig,
        summary: &mut RunSummary,
    ) -> Result<(), DeployError> {
        let target = config.target();

        self.advance()?;
        let repo = self.stager.stage(config).await?;
        summary.repository = Some(repo.clone());

        self.advance()?;
        config.validate()?;
        config.ensure_key_readable().await?;

        self.advance()?;
        self.connect(&target).await?;

        self.advance()?;
        let remote_path = RemoteLayout::for_target(&target).app_dir(&repo.name);
        self.sync.sync(&repo, &target, &remote_path).await?;

        self.advance()?;
        provision(self.executor.as_ref(), &target).await?;

        self.advance()?;
        DeploymentRunner::new(self.executor.as_ref(), &self.settings)
            .run(&target, &remote_path, &repo, config.app_port)
            .await?;

        self.advance()?;
        let route = configure(self.executor.as_ref(), &target, &repo.name, config.app_port).await?;
        summary.route = Some(route);

        self.advance()?;
        let report = validate(
            self.executor.as_ref(),
            self.prober.as_ref(),
            &target,
            config.app_port,
            &config.remote_host,
        )
        .await;
        summary.report = Some(report);

        self.advance()?;
        info!("Deployment of {} to {} completed", repo.name, target.host);
        Ok(())
    }

    fn advance(&mut self) -> Result<(), DeployError> {
        let stage = self
            .fsm
            .process(RunEvent::Advance)
            .map_err(DeployError::Precondition)?;
        if !stage.is_terminal() {
            info!(stage = %stage, "Stage started");
        }
        Ok(())
    }

    /// Probe the host; on failure probe once more to surface the raw error, then abort
    async fn connect(&self, target: &RemoteTarget) -> Result<(), DeployError> {
        info!("Checking connectivity to {}", target.destination());
        warn!(host = %target.host, "Host key verification is disabled for this run");
        let Err(first) = self.executor.probe(target, PROBE_TIMEOUT).await else {
            return Ok(());
        };
        warn!("Connectivity check failed: {}", first);
        match self.executor.probe(target, PROBE_TIMEOUT).await {
            Ok(()) => warn!("Diagnostic retry connected; the host is unstable"),
            Err(DeployError::Connectivity { message, .. }) => {
                error!("Diagnostic retry: {}", message)
            }
            Err(e) => error!("Diagnostic retry: {}", e),
        }
        Err(first)
    }
}
