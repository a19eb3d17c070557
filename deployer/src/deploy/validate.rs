//! Post-deploy probes
//!
//! Probes only observe: a failure is recorded in the report and never turns
//! into an error or a rollback.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{info, warn};
use url::Url;

use crate::errors::DeployError;
use crate::models::deployment::{ProbeResult, ProbeStatus, ValidationReport, PUBLIC_PORT};
use crate::remote::executor::RemoteExecutor;
use crate::remote::target::RemoteTarget;

pub const PROBE_CONTAINERS: &str = "running containers";
pub const PROBE_LOCAL_HTTP: &str = "local http";
pub const PROBE_EXTERNAL_HTTP: &str = "external http";

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

const LIST_CONTAINERS: &str =
    "sudo docker ps --format 'table {{.Names}}\\t{{.Status}}\\t{{.Ports}}'";

/// Any response below a server error counts as reachable
pub fn is_reachable(status: u16) -> bool {
    (100..500).contains(&status)
}

/// Public URL of `host` on the proxy port
pub fn public_url(host: &str) -> Result<Url, DeployError> {
    let host = if host.contains(':') && !host.starts_with('[') {
        format!("[{}]", host)
    } else {
        host.to_string()
    };
    Url::parse(&format!("http://{}:{}/", host, PUBLIC_PORT))
        .map_err(|e| DeployError::Config(format!("invalid host {}: {}", host, e)))
}

/// HTTP GET from the orchestrating machine
#[async_trait]
pub trait ExternalProbe: Send + Sync {
    /// Status code of a GET to `url`
    async fn get_status(&self, url: &Url) -> Result<u16, DeployError>;
}

pub struct HttpProber {
    client: Client,
}

impl HttpProber {
    pub fn new() -> Result<Self, DeployError> {
        let client = Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ExternalProbe for HttpProber {
    async fn get_status(&self, url: &Url) -> Result<u16, DeployError> {
        let response = self.client.get(url.clone()).send().await?;
        Ok(response.status().as_u16())
    }
}

/// Run the three probes and collect their results
pub async fn validate(
    executor: &dyn RemoteExecutor,
    prober: &dyn ExternalProbe,
    target: &RemoteTarget,
    port: u16,
    public_host: &str,
) -> ValidationReport {
    info!("Validating deployment");
    let mut report = ValidationReport::default();
    report.push(probe_containers(executor, target).await);
    report.push(probe_local(executor, target, port).await);
    report.push(probe_external(prober, public_host).await);

    for probe in &report.probes {
        match probe.status {
            ProbeStatus::Passed => info!(probe = %probe.name, "PASS {}", probe.detail),
            ProbeStatus::Failed => warn!(probe = %probe.name, "FAIL {}", probe.detail),
        }
    }
    report
}

async fn probe_containers(executor: &dyn RemoteExecutor, target: &RemoteTarget) -> ProbeResult {
    match executor.execute(target, LIST_CONTAINERS).await {
        Ok(output) if output.success() => {
            for line in output.stdout.lines() {
                info!("{}", line);
            }
            let running = output.stdout.lines().skip(1).filter(|l| !l.trim().is_empty()).count();
            if running > 0 {
                ProbeResult::passed(PROBE_CONTAINERS, format!("{} running", running))
            } else {
                ProbeResult::failed(PROBE_CONTAINERS, "no running containers")
            }
        }
        Ok(output) => ProbeResult::failed(
            PROBE_CONTAINERS,
            format!("docker ps exited {}: {}", output.exit_code, output.stderr.trim()),
        ),
        Err(e) => ProbeResult::failed(PROBE_CONTAINERS, e.to_string()),
    }
}

/// Status of a loopback GET, bounded like the external probe
fn local_http_command(url: &str) -> String {
    format!(
        "curl -s -o /dev/null --max-time {} -w '%{{http_code}}' {}",
        HTTP_TIMEOUT.as_secs(),
        url
    )
}

async fn probe_local(executor: &dyn RemoteExecutor, target: &RemoteTarget, port: u16) -> ProbeResult {
    let url = format!("http://127.0.0.1:{}/", port);
    let command = local_http_command(&url);
    match executor.execute(target, &command).await {
        Ok(output) => match output.stdout.trim().parse::<u16>() {
            Ok(status) if is_reachable(status) => {
                ProbeResult::passed(PROBE_LOCAL_HTTP, format!("{} returned {}", url, status))
            }
            Ok(status) => {
                ProbeResult::failed(PROBE_LOCAL_HTTP, format!("{} returned {}", url, status))
            }
            Err(_) => ProbeResult::failed(
                PROBE_LOCAL_HTTP,
                format!("{} unreachable (curl exit {})", url, output.exit_code),
            ),
        },
        Err(e) => ProbeResult::failed(PROBE_LOCAL_HTTP, e.to_string()),
    }
}

async fn probe_external(prober: &dyn ExternalProbe, public_host: &str) -> ProbeResult {
    let url = match public_url(public_host) {
        Ok(url) => url,
        Err(e) => return ProbeResult::failed(PROBE_EXTERNAL_HTTP, e.to_string()),
    };
    match prober.get_status(&url).await {
        Ok(status) if is_reachable(status) => {
            ProbeResult::passed(PROBE_EXTERNAL_HTTP, format!("{} returned {}", url, status))
        }
        Ok(status) => {
            ProbeResult::failed(PROBE_EXTERNAL_HTTP, format!("{} returned {}", url, status))
        }
        Err(e) => ProbeResult::failed(PROBE_EXTERNAL_HTTP, format!("{}: {}", url, e)),
    }
}
