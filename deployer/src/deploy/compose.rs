//! Docker Compose deployment strategy

use crate::remote::shell::quote;
use crate::remote::step::RemoteStep;

/// Lines of container logs collected after a deploy
pub const LOG_TAIL: u32 = 50;

/// A compose project rooted in a remote directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeProject {
    pub app_dir: String,
    pub project: String,
    pub manifest: String,
}

impl ComposeProject {
    pub fn new(
        app_dir: impl Into<String>,
        project: impl Into<String>,
        manifest: impl Into<String>,
    ) -> Self {
        Self {
            app_dir: app_dir.into(),
            project: project.into(),
            manifest: manifest.into(),
        }
    }

    /// `docker compose <args>` scoped to this project, run from its directory
    pub fn compose(&self, args: &str) -> String {
        format!(
            "cd {} && sudo docker compose -p {} -f {} {}",
            quote(&self.app_dir),
            quote(&self.project),
            quote(&self.manifest),
            args
        )
    }

    /// Tear down, pull, then build and start in the background
    pub fn deploy_steps(&self) -> Vec<RemoteStep> {
        vec![
            RemoteStep::command("compose down", self.compose("down --remove-orphans")).best_effort(),
            RemoteStep::command("compose pull", self.compose("pull --ignore-pull-failures"))
                .best_effort(),
            RemoteStep::command("compose up", self.compose("up -d --build")),
        ]
    }

    pub fn diagnostic_steps(&self) -> Vec<RemoteStep> {
        vec![
            RemoteStep::command("compose status", self.compose("ps"))
                .best_effort()
                .echo_output(),
            RemoteStep::command(
                "compose logs",
                self.compose(&format!("logs --tail {}", LOG_TAIL)),
            )
            .best_effort()
            .echo_output(),
        ]
    }
}
