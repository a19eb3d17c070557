//! Remote environment provisioning
//!
//! Every step probes before acting, so a host that already has the
//! container engine, the compose plugin and nginx running sees no package
//! manager invocation at all.

use tracing::{info, warn};

use crate::errors::DeployError;
use crate::remote::executor::RemoteExecutor;
use crate::remote::shell::quote;
use crate::remote::step::{run_steps, RemoteStep, StepOutcome, StepReport};
use crate::remote::target::RemoteTarget;

pub const STEP_REFRESH_INDEX: &str = "refresh package index";
pub const STEP_PREREQUISITES: &str = "install base prerequisites";
pub const STEP_DOCKER: &str = "install container engine";
pub const STEP_COMPOSE: &str = "install compose plugin";
pub const STEP_NGINX: &str = "install nginx";
pub const STEP_DOCKER_GROUP: &str = "add user to docker group";
pub const STEP_SERVICES: &str = "enable services";

const APT_INSTALL: &str = "sudo DEBIAN_FRONTEND=noninteractive apt-get install -y";

const HAS_PREREQUISITES: &str =
    "command -v curl >/dev/null 2>&1 && command -v gpg >/dev/null 2>&1 && command -v rsync >/dev/null 2>&1";
const HAS_DOCKER: &str = "command -v docker >/dev/null 2>&1";
const HAS_COMPOSE: &str = "sudo docker compose version >/dev/null 2>&1";
const HAS_NGINX: &str = "command -v nginx >/dev/null 2>&1";

/// Installs Docker Engine from Docker's own apt repository
const DOCKER_INSTALL_SCRIPT: &str = r#"sudo install -m 0755 -d /etc/apt/keyrings
. /etc/os-release
curl -fsSL "https://download.docker.com/linux/${ID}/gpg" | sudo gpg --batch --yes --dearmor -o /etc/apt/keyrings/docker.gpg
sudo chmod a+r /etc/apt/keyrings/docker.gpg
echo "deb [arch=$(dpkg --print-architecture) signed-by=/etc/apt/keyrings/docker.gpg] https://download.docker.com/linux/${ID} ${VERSION_CODENAME} stable" | sudo tee /etc/apt/sources.list.d/docker.list > /dev/null
sudo apt-get update -y
sudo DEBIAN_FRONTEND=noninteractive apt-get install -y docker-ce docker-ce-cli containerd.io docker-buildx-plugin docker-compose-plugin"#;

/// Ordered provisioning steps for `user`
pub fn provisioning_steps(user: &str) -> Vec<RemoteStep> {
    let user = quote(user);
    let everything_present = [HAS_PREREQUISITES, HAS_DOCKER, HAS_COMPOSE, HAS_NGINX].join(" && ");

    vec![
        RemoteStep::command(STEP_REFRESH_INDEX, "sudo apt-get update -y").unless(everything_present),
        RemoteStep::command(
            STEP_PREREQUISITES,
            format!("{} ca-certificates curl gnupg rsync", APT_INSTALL),
        )
        .unless(HAS_PREREQUISITES),
        RemoteStep::script(STEP_DOCKER, DOCKER_INSTALL_SCRIPT).unless(HAS_DOCKER),
        RemoteStep::command(STEP_COMPOSE, format!("{} docker-compose-plugin", APT_INSTALL))
            .unless(HAS_COMPOSE),
        RemoteStep::command(STEP_NGINX, format!("{} nginx", APT_INSTALL)).unless(HAS_NGINX),
        RemoteStep::command(STEP_DOCKER_GROUP, format!("sudo usermod -aG docker {}", user))
            .unless(format!("id -nG {} | grep -qw docker", user))
            .best_effort(),
        RemoteStep::command(STEP_SERVICES, "sudo systemctl enable --now docker nginx").unless(
            "systemctl is-active --quiet docker && systemctl is-active --quiet nginx \
             && systemctl is-enabled --quiet docker && systemctl is-enabled --quiet nginx",
        ),
    ]
}

/// Bring the remote host to the state deployments need
pub async fn provision(
    executor: &dyn RemoteExecutor,
    target: &RemoteTarget,
) -> Result<Vec<StepReport>, DeployError> {
    info!(host = %target.host, "Provisioning remote environment");
    let reports = run_steps(executor, target, &provisioning_steps(&target.user)).await?;

    if let Some(group) = reports.iter().find(|r| r.name == STEP_DOCKER_GROUP) {
        if group.outcome != StepOutcome::Skipped {
            // Group membership only applies to new login sessions
            warn!(
                user = %target.user,
                "docker group change takes effect on next login; docker commands in this run use sudo"
            );
        }
    }

    let applied = reports
        .iter()
        .filter(|r| matches!(r.outcome, StepOutcome::Applied(_)))
        .count();
    info!(applied, total = reports.len(), "Provisioning complete");
    Ok(reports)
}
