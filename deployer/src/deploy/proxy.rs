//! nginx reverse proxy site configuration

use tracing::{error, info};

use crate::errors::DeployError;
use crate::models::deployment::ProxyRoute;
use crate::remote::executor::RemoteExecutor;
use crate::remote::shell::quote;
use crate::remote::step::{run_step, RemoteStep};
use crate::remote::target::RemoteTarget;
use crate::storage::layout::RemoteLayout;

const HEREDOC_MARKER: &str = "AJDEPLOY_SITE";

pub const SYNTAX_CHECK: &str = "sudo nginx -t";
pub const RELOAD: &str = "sudo systemctl reload nginx";

/// Script writing `body` to `path` as root
fn write_file_script(path: &str, body: &str) -> String {
    format!(
        "sudo tee {} > /dev/null <<'{marker}'\n{}{marker}\n",
        quote(path),
        body,
        marker = HEREDOC_MARKER
    )
}

/// Whether `test <flag> <path>` holds on the remote host
async fn remote_test(
    executor: &dyn RemoteExecutor,
    target: &RemoteTarget,
    flag: &str,
    path: &str,
) -> Result<bool, DeployError> {
    let output = executor
        .execute(target, &format!("test {} {}", flag, quote(path)))
        .await?;
    Ok(output.success())
}

/// Writes and enables the site for `repo_name`, then reloads nginx.
///
/// The whole configuration is syntax checked before the stock default site
/// is touched. If the check fails the previous site file and link state are
/// put back and nginx is not reloaded.
pub async fn configure(
    executor: &dyn RemoteExecutor,
    target: &RemoteTarget,
    repo_name: &str,
    port: u16,
) -> Result<ProxyRoute, DeployError> {
    let layout = RemoteLayout::for_target(target);
    let route = ProxyRoute::new(repo_name, port);
    let available = layout.site_available(repo_name);
    let enabled = layout.site_enabled(repo_name);
    let backup = layout.site_backup(repo_name);
    info!("Routing port {} to {}", route.public_port, route.upstream());

    let had_site = remote_test(executor, target, "-e", &available).await?;
    let was_enabled = remote_test(executor, target, "-L", &enabled).await?;
    if had_site {
        let save = RemoteStep::command(
            "back up proxy site",
            format!("sudo cp -a {} {}", quote(&available), quote(&backup)),
        );
        run_step(executor, target, &save).await?;
    }

    let steps = [
        RemoteStep::script("write proxy site", write_file_script(&available, &route.render())),
        RemoteStep::command(
            "enable proxy site",
            format!("sudo ln -sfn {} {}", quote(&available), quote(&enabled)),
        ),
    ];
    for step in &steps {
        run_step(executor, target, step).await?;
    }

    let check = executor.execute(target, SYNTAX_CHECK).await?;
    if !check.success() {
        error!("nginx rejected the configuration; restoring the previous site");
        let mut restore = Vec::new();
        if had_site {
            restore.push(RemoteStep::command(
                "restore proxy site",
                format!("sudo mv -f {} {}", quote(&backup), quote(&available)),
            ));
        } else {
            restore.push(
                RemoteStep::command(
                    "remove rejected site",
                    format!("sudo rm -f {}", quote(&available)),
                )
                .best_effort(),
            );
        }
        if !was_enabled {
            restore.push(
                RemoteStep::command(
                    "disable rejected site",
                    format!("sudo rm -f {}", quote(&enabled)),
                )
                .best_effort(),
            );
        }
        for step in &restore {
            run_step(executor, target, step).await?;
        }
        return Err(DeployError::Validation(format!(
            "nginx -t failed: {}",
            check.stderr.trim()
        )));
    }

    let default_site = layout.default_site_enabled();
    let mut finish = vec![RemoteStep::command(
        "disable default site",
        format!("sudo rm -f {}", quote(&default_site)),
    )
    .unless(format!("test ! -e {}", quote(&default_site)))
    .best_effort()];
    if had_site {
        finish.push(
            RemoteStep::command("drop site backup", format!("sudo rm -f {}", quote(&backup)))
                .best_effort(),
        );
    }
    finish.push(RemoteStep::command("reload nginx", RELOAD));
    for step in &finish {
        run_step(executor, target, step).await?;
    }
    info!("Proxy site {} enabled", enabled);
    Ok(route)
}
