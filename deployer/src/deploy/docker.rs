//! Single Dockerfile deployment strategy

use crate::deploy::compose::LOG_TAIL;
use crate::remote::shell::quote;
use crate::remote::step::RemoteStep;

/// Fixed name of the application container
pub const APP_CONTAINER: &str = "app";

/// An image built from a Dockerfile and run as the `app` container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DockerfileProject {
    pub app_dir: String,
    pub image: String,
    pub port: u16,
}

impl DockerfileProject {
    /// `slug` is the lowercased repository name
    pub fn new(app_dir: impl Into<String>, slug: &str, port: u16) -> Self {
        Self {
            app_dir: app_dir.into(),
            image: format!("{}:latest", slug),
            port,
        }
    }

    /// Force-remove the application container if one exists
    pub fn remove_step(&self) -> RemoteStep {
        RemoteStep::command(
            "remove previous container",
            format!("sudo docker rm -f {}", APP_CONTAINER),
        )
        .unless(format!(
            "! sudo docker container inspect {} >/dev/null 2>&1",
            APP_CONTAINER
        ))
        .best_effort()
    }

    pub fn build_step(&self) -> RemoteStep {
        RemoteStep::command(
            "docker build",
            format!(
                "cd {} && sudo docker build -t {} .",
                quote(&self.app_dir),
                quote(&self.image)
            ),
        )
    }

    pub fn start_step(&self) -> RemoteStep {
        RemoteStep::command(
            "docker run",
            format!(
                "sudo docker run -d --name {} --restart unless-stopped -p {port}:{port} {}",
                APP_CONTAINER,
                quote(&self.image),
                port = self.port
            ),
        )
    }

    pub fn diagnostic_steps(&self) -> Vec<RemoteStep> {
        vec![
            RemoteStep::command(
                "container status",
                format!("sudo docker ps -a --filter 'name=^{}$'", APP_CONTAINER),
            )
            .best_effort()
            .echo_output(),
            RemoteStep::command(
                "container logs",
                format!("sudo docker logs --tail {} {}", LOG_TAIL, APP_CONTAINER),
            )
            .best_effort()
            .echo_output(),
        ]
    }
}
