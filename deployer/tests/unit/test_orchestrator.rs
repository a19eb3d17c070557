//! End-to-end run tests against in-memory collaborators

mod support;

use std::sync::Arc;
use std::time::Duration;

use tempfile::NamedTempFile;

use ajdeploy::app::run::{Orchestrator, RunSummary};
use ajdeploy::deploy::fsm::RunStage;
use ajdeploy::deploy::runner::RunnerSettings;
use ajdeploy::errors::{DeployError, EXIT_FAILURE, EXIT_INTERRUPTED, EXIT_SUCCESS};
use ajdeploy::process::CommandOutput;

use support::{config, FakeExecutor, FakeProber, FakeStager, FakeSync, LogCapture};

const SITE: &str = "/etc/nginx/sites-available/shop.conf";
const SITE_BACKUP: &str = "/etc/nginx/sites-available/shop.conf.bak";
const SITE_LINK: &str = "/etc/nginx/sites-enabled/shop.conf";
const DEFAULT_SITE: &str = "/etc/nginx/sites-enabled/default";

const CONTAINER_TABLE: &str = "NAMES\tSTATUS\tPORTS\nshop-web-1\tUp 2 seconds\t0.0.0.0:8080->8080/tcp\n";

/// Executor for a provisioned host whose app answers on the loopback port
fn healthy_host() -> FakeExecutor {
    FakeExecutor::new()
        .on("curl -s -o /dev/null", 0, "200", "")
        .on("docker ps --format", 0, CONTAINER_TABLE, "")
}

fn settings() -> RunnerSettings {
    RunnerSettings {
        start_retry_delay: Duration::ZERO,
    }
}

struct Harness {
    executor: Arc<FakeExecutor>,
    sync: Arc<FakeSync>,
    prober: Arc<FakeProber>,
    key: NamedTempFile,
}

impl Harness {
    fn new(executor: FakeExecutor) -> Self {
        Self::with_sync(executor, FakeSync::default())
    }

    fn with_sync(executor: FakeExecutor, sync: FakeSync) -> Self {
        Self {
            executor: Arc::new(executor),
            sync: Arc::new(sync),
            prober: Arc::new(FakeProber::answering(200)),
            key: NamedTempFile::new().unwrap(),
        }
    }

    async fn run(&self, stager: FakeStager) -> RunSummary {
        self.run_until(stager, std::future::pending()).await
    }

    async fn run_until(
        &self,
        stager: FakeStager,
        shutdown: impl std::future::Future<Output = ()>,
    ) -> RunSummary {
        let mut orchestrator = Orchestrator::new(
            Arc::new(stager),
            self.executor.clone(),
            self.sync.clone(),
            self.prober.clone(),
            settings(),
        );
        orchestrator.run(&config(self.key.path()), shutdown).await
    }
}

#[tokio::test]
async fn test_compose_project_full_run() {
    let harness = Harness::new(healthy_host());

    let summary = harness.run(FakeStager::compose("shop")).await;

    assert!(summary.error.is_none(), "{:?}", summary.error);
    assert_eq!(summary.stage, RunStage::Completed);
    assert_eq!(summary.exit_code(), EXIT_SUCCESS);
    assert_eq!(harness.sync.synced(), vec!["/home/ubuntu/shop".to_string()]);

    let executor = &harness.executor;
    let down = executor.position("-p shop -f docker-compose.yml down").unwrap();
    let pull = executor.position("-p shop -f docker-compose.yml pull").unwrap();
    let up = executor.position("-p shop -f docker-compose.yml up -d --build").unwrap();
    let status = executor.position("-p shop -f docker-compose.yml ps").unwrap();
    assert!(down < pull && pull < up && up < status);

    let site = executor.position(&format!("sudo tee {}", SITE)).unwrap();
    let check = executor.position("sudo nginx -t").unwrap();
    let reload = executor.position("systemctl reload nginx").unwrap();
    assert!(site < check && check < reload);
    assert!(executor.calls()[site].contains("proxy_pass http://127.0.0.1:8080;"));

    let route = summary.route.unwrap();
    assert_eq!(route.public_port, 80);
    assert_eq!(route.upstream(), "http://127.0.0.1:8080");

    let report = summary.report.unwrap();
    assert_eq!(report.probes.len(), 3);
    assert!(report.all_passed(), "{}", report);
    assert_eq!(
        *harness.prober.urls.lock().unwrap(),
        vec!["http://203.0.113.7/".to_string()]
    );
}

#[tokio::test]
async fn test_second_run_repeats_the_same_commands() {
    let harness = Harness::new(healthy_host());

    harness.run(FakeStager::compose("shop")).await;
    let first = harness.executor.calls();
    let second_summary = harness.run(FakeStager::compose("shop")).await;
    let all = harness.executor.calls();

    assert_eq!(second_summary.stage, RunStage::Completed);
    assert_eq!(&all[first.len()..], first.as_slice());
}

#[tokio::test]
async fn test_missing_descriptor_touches_no_remote() {
    let harness = Harness::new(healthy_host());

    let summary = harness.run(FakeStager::without_descriptor()).await;

    assert!(matches!(summary.error, Some(DeployError::BuildDescriptorMissing(_))));
    assert_eq!(summary.stage, RunStage::Failed);
    assert_eq!(summary.failed_at, Some(RunStage::Staging));
    assert_eq!(summary.exit_code(), EXIT_FAILURE);
    assert_eq!(harness.executor.probes(), 0);
    assert!(harness.executor.calls().is_empty());
    assert!(harness.sync.synced().is_empty());
}

#[tokio::test]
async fn test_unreadable_key_fails_before_connecting() {
    let harness = Harness::new(healthy_host());
    let mut orchestrator = Orchestrator::new(
        Arc::new(FakeStager::compose("shop")),
        harness.executor.clone(),
        harness.sync.clone(),
        harness.prober.clone(),
        settings(),
    );
    let missing = harness.key.path().with_extension("missing");

    let summary = orchestrator.run(&config(&missing), std::future::pending()).await;

    assert!(matches!(summary.error, Some(DeployError::Precondition(_))));
    assert_eq!(summary.failed_at, Some(RunStage::Checking));
    assert_eq!(harness.executor.probes(), 0);
}

#[tokio::test]
async fn test_unreachable_host_retries_probe_then_aborts() {
    let harness = Harness::new(healthy_host().failing_probes(2));

    let summary = harness.run(FakeStager::compose("shop")).await;

    assert!(matches!(summary.error, Some(DeployError::Connectivity { .. })));
    assert_eq!(summary.failed_at, Some(RunStage::Connecting));
    assert_eq!(harness.executor.probes(), 2);
    assert!(harness.sync.synced().is_empty());
    assert!(harness.executor.calls().is_empty());
}

/// nginx rejects whatever this run writes
fn rejecting_nginx(executor: FakeExecutor) -> FakeExecutor {
    executor.on(
        "sudo nginx -t",
        1,
        "",
        "nginx: [emerg] unknown directive \"proxy_pas\"",
    )
}

#[tokio::test]
async fn test_rejected_proxy_config_restores_previous_site() {
    // A site from an earlier run is live and nginx still ships its default site
    let harness = Harness::new(rejecting_nginx(
        healthy_host().on(&format!("test ! -e {}", DEFAULT_SITE), 1, "", ""),
    ));

    let summary = harness.run(FakeStager::compose("shop")).await;

    assert!(matches!(summary.error, Some(DeployError::Validation(_))));
    assert_eq!(summary.failed_at, Some(RunStage::ConfiguringProxy));
    assert!(summary.report.is_none());

    let executor = &harness.executor;
    let backup = executor
        .position(&format!("sudo cp -a {} {}", SITE, SITE_BACKUP))
        .unwrap();
    let write = executor.position(&format!("sudo tee {}", SITE)).unwrap();
    let check = executor.position("sudo nginx -t").unwrap();
    let restore = executor
        .position(&format!("sudo mv -f {} {}", SITE_BACKUP, SITE))
        .unwrap();
    assert!(backup < write && write < check && check < restore);

    assert!(!executor.ran(&format!("sudo rm -f {}", DEFAULT_SITE)));
    assert!(!executor.ran(&format!("sudo rm -f {}", SITE_LINK)));
    assert!(!executor.ran("systemctl reload nginx"));
}

#[tokio::test]
async fn test_rejected_first_proxy_config_is_removed() {
    let harness = Harness::new(rejecting_nginx(
        healthy_host()
            .on(&format!("test -e {}", SITE), 1, "", "")
            .on(&format!("test -L {}", SITE_LINK), 1, "", ""),
    ));

    let summary = harness.run(FakeStager::compose("shop")).await;

    assert!(matches!(summary.error, Some(DeployError::Validation(_))));
    let executor = &harness.executor;
    assert!(!executor.ran(SITE_BACKUP));
    let check = executor.position("sudo nginx -t").unwrap();
    assert!(executor.position(&format!("sudo rm -f {}", SITE_LINK)).unwrap() > check);
    assert!(executor.position(&format!("sudo rm -f {}", SITE)).unwrap() > check);
    assert!(!executor.ran("systemctl reload nginx"));
}

#[tokio::test]
async fn test_default_site_is_disabled_after_a_passing_check() {
    let harness = Harness::new(
        healthy_host()
            .on(&format!("test ! -e {}", DEFAULT_SITE), 1, "", "")
            .on(&format!("sudo rm -f {}", DEFAULT_SITE), 1, "", "rm: Operation not permitted"),
    );

    let summary = harness.run(FakeStager::compose("shop")).await;

    // Removal is best-effort
    assert!(summary.error.is_none(), "{:?}", summary.error);
    let executor = &harness.executor;
    let check = executor.position("sudo nginx -t").unwrap();
    let disable = executor.position(&format!("sudo rm -f {}", DEFAULT_SITE)).unwrap();
    let reload = executor.position("systemctl reload nginx").unwrap();
    assert!(check < disable && disable < reload);
    assert!(executor.position(&format!("sudo rm -f {}", SITE_BACKUP)).unwrap() < reload);
}

#[tokio::test]
async fn test_absent_default_site_is_left_alone() {
    let harness = Harness::new(healthy_host());

    harness.run(FakeStager::compose("shop")).await;

    assert!(harness.executor.ran(&format!("test ! -e {}", DEFAULT_SITE)));
    assert!(!harness.executor.ran(&format!("sudo rm -f {}", DEFAULT_SITE)));
}

#[tokio::test]
async fn test_compose_project_name_is_normalised() {
    let harness = Harness::new(healthy_host());

    let summary = harness.run(FakeStager::compose("My.App")).await;

    assert!(summary.error.is_none(), "{:?}", summary.error);
    assert_eq!(harness.sync.synced(), vec!["/home/ubuntu/My.App".to_string()]);
    assert!(harness.executor.ran(
        "cd /home/ubuntu/My.App && sudo docker compose -p my-app -f docker-compose.yml up -d --build"
    ));
    assert!(!harness.executor.ran("-p my.app"));
}

#[tokio::test]
async fn test_existing_app_container_is_removed_before_build() {
    // The guard fails because a container named `app` exists
    let harness = Harness::new(healthy_host().on("docker container inspect app", 1, "", ""));

    let summary = harness.run(FakeStager::dockerfile("shop")).await;

    assert!(summary.error.is_none(), "{:?}", summary.error);
    let executor = &harness.executor;
    let remove = executor.position("sudo docker rm -f app").unwrap();
    let build = executor.position("sudo docker build -t shop:latest .").unwrap();
    let start = executor.position("docker run -d --name app").unwrap();
    assert!(remove < build && build < start);
}

#[tokio::test]
async fn test_host_key_warning_is_logged_once() {
    let (logs, _guard) = LogCapture::install();
    let harness = Harness::new(healthy_host().failing_probes(2));

    harness.run(FakeStager::compose("shop")).await;

    assert_eq!(harness.executor.probes(), 2);
    assert_eq!(logs.count("Host key verification is disabled"), 1);
}

#[tokio::test]
async fn test_passing_probes_are_logged() {
    let (logs, _guard) = LogCapture::install();
    let harness = Harness::new(healthy_host());

    harness.run(FakeStager::compose("shop")).await;

    let contents = logs.contents();
    assert!(contents.contains("PASS 1 running"), "{contents}");
    assert!(contents.contains("PASS http://127.0.0.1:8080/ returned 200"));
    assert!(contents.contains("PASS http://203.0.113.7/ returned 200"));
}

#[tokio::test]
async fn test_dockerfile_start_is_retried_once() {
    let executor = healthy_host().on_sequence(
        "docker run -d",
        vec![
            CommandOutput::new(125, "", "Bind for 0.0.0.0:8080 failed: port is already allocated"),
            CommandOutput::new(0, "3f2a9c", ""),
        ],
    );
    let harness = Harness::new(executor);

    let summary = harness.run(FakeStager::dockerfile("Shop")).await;

    assert!(summary.error.is_none(), "{:?}", summary.error);
    let executor = &harness.executor;
    assert_eq!(executor.count("docker run -d --name app"), 2);
    assert!(executor.ran("sudo docker build -t shop:latest ."));
    assert!(executor.ran("-p 8080:8080 shop:latest"));
    let started = executor.position("docker run -d").unwrap();
    assert!(executor.position("docker logs --tail 50 app").unwrap() > started);
}

#[tokio::test]
async fn test_dockerfile_start_failing_twice_still_collects_diagnostics() {
    let harness =
        Harness::new(healthy_host().on("docker run -d", 125, "", "port is already allocated"));

    let summary = harness.run(FakeStager::dockerfile("shop")).await;

    match &summary.error {
        Some(DeployError::Command { step, exit_code, .. }) => {
            assert_eq!(step, "docker run");
            assert_eq!(*exit_code, 125);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(summary.failed_at, Some(RunStage::Deploying));
    assert_eq!(harness.executor.count("docker run -d --name app"), 2);
    assert!(harness.executor.ran("docker logs --tail 50 app"));
    assert!(!harness.executor.ran("nginx -t"));
}

#[tokio::test]
async fn test_failed_probes_are_reported_not_fatal() {
    let harness = Harness::new(FakeExecutor::new().on("curl -s -o /dev/null", 7, "000", ""));

    let summary = harness.run(FakeStager::compose("shop")).await;

    assert!(summary.error.is_none());
    assert_eq!(summary.stage, RunStage::Completed);
    let report = summary.report.unwrap();
    assert_eq!(report.failures().count(), 2);
}

#[tokio::test]
async fn test_interrupt_stops_run_with_distinct_exit_code() {
    let harness = Harness::with_sync(healthy_host(), FakeSync::hanging());

    let summary = harness
        .run_until(FakeStager::compose("shop"), tokio::time::sleep(Duration::from_millis(50)))
        .await;

    assert!(matches!(summary.error, Some(DeployError::Interrupted)));
    assert_eq!(summary.stage, RunStage::Interrupted);
    assert_eq!(summary.failed_at, Some(RunStage::Syncing));
    assert_eq!(summary.exit_code(), EXIT_INTERRUPTED);
    assert_eq!(harness.executor.probes(), 1);
    assert!(harness.executor.calls().is_empty());
}
