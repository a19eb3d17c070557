//! In-memory collaborators shared by the integration tests
#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use tracing::subscriber::DefaultGuard;
use url::Url;

use ajdeploy::app::options::DeploymentConfig;
use ajdeploy::deploy::git::SourceStage;
use ajdeploy::deploy::sync::DirectorySync;
use ajdeploy::deploy::validate::ExternalProbe;
use ajdeploy::errors::DeployError;
use ajdeploy::models::deployment::{BuildDescriptor, WorkingRepository};
use ajdeploy::process::CommandOutput;
use ajdeploy::remote::executor::RemoteExecutor;
use ajdeploy::remote::target::RemoteTarget;

enum Reply {
    Output(CommandOutput),
    Unreachable,
}

impl Reply {
    fn to_result(&self, host: &str) -> Result<CommandOutput, DeployError> {
        match self {
            Reply::Output(output) => Ok(output.clone()),
            Reply::Unreachable => Err(DeployError::Connectivity {
                host: host.to_string(),
                message: "Connection refused".to_string(),
            }),
        }
    }
}

struct Rule {
    pattern: String,
    replies: VecDeque<Reply>,
}

/// Records every command and answers from rules matched by substring.
///
/// Unmatched commands exit 0 with no output, so every guard reports its
/// step as already satisfied unless a rule says otherwise. A rule with
/// several replies hands them out in order and repeats the last one.
#[derive(Default)]
pub struct FakeExecutor {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<String>>,
    probe_failures: Mutex<u32>,
    probes: Mutex<u32>,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, pattern: &str, exit_code: i32, stdout: &str, stderr: &str) -> Self {
        self.on_sequence(pattern, vec![CommandOutput::new(exit_code, stdout, stderr)])
    }

    pub fn on_sequence(self, pattern: &str, outputs: Vec<CommandOutput>) -> Self {
        self.push_rule(pattern, outputs.into_iter().map(Reply::Output).collect())
    }

    pub fn unreachable_on(self, pattern: &str) -> Self {
        self.push_rule(pattern, VecDeque::from([Reply::Unreachable]))
    }

    /// The next `count` probes fail
    pub fn failing_probes(self, count: u32) -> Self {
        *self.probe_failures.lock().unwrap() = count;
        self
    }

    fn push_rule(self, pattern: &str, replies: VecDeque<Reply>) -> Self {
        self.rules.lock().unwrap().push(Rule {
            pattern: pattern.to_string(),
            replies,
        });
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pattern: &str) -> usize {
        self.calls().iter().filter(|c| c.contains(pattern)).count()
    }

    pub fn ran(&self, pattern: &str) -> bool {
        self.count(pattern) > 0
    }

    /// Index of the first call containing `pattern`
    pub fn position(&self, pattern: &str) -> Option<usize> {
        self.calls().iter().position(|c| c.contains(pattern))
    }

    pub fn probes(&self) -> u32 {
        *self.probes.lock().unwrap()
    }

    fn reply(&self, target: &RemoteTarget, command: &str) -> Result<CommandOutput, DeployError> {
        self.calls.lock().unwrap().push(command.to_string());
        let mut rules = self.rules.lock().unwrap();
        match rules.iter_mut().find(|r| command.contains(&r.pattern)) {
            Some(rule) => {
                let reply = if rule.replies.len() > 1 {
                    rule.replies.pop_front()
                } else {
                    None
                };
                match reply {
                    Some(reply) => reply.to_result(&target.host),
                    None => rule.replies[0].to_result(&target.host),
                }
            }
            None => Ok(CommandOutput::new(0, "", "")),
        }
    }
}

#[async_trait]
impl RemoteExecutor for FakeExecutor {
    async fn execute(
        &self,
        target: &RemoteTarget,
        command: &str,
    ) -> Result<CommandOutput, DeployError> {
        self.reply(target, command)
    }

    async fn execute_script(
        &self,
        target: &RemoteTarget,
        script: &str,
    ) -> Result<CommandOutput, DeployError> {
        self.reply(target, script)
    }

    async fn probe(&self, target: &RemoteTarget, _timeout: Duration) -> Result<(), DeployError> {
        *self.probes.lock().unwrap() += 1;
        let mut failures = self.probe_failures.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            return Err(DeployError::Connectivity {
                host: target.host.clone(),
                message: "ssh: connect to host port 22: Connection timed out".to_string(),
            });
        }
        Ok(())
    }
}

/// Stager returning a fixed repository, or a missing-descriptor error
pub struct FakeStager {
    pub repo: Option<WorkingRepository>,
    pub hang: bool,
}

impl FakeStager {
    pub fn compose(name: &str) -> Self {
        Self::with(name, BuildDescriptor::Compose {
            manifest: "docker-compose.yml".to_string(),
        })
    }

    pub fn dockerfile(name: &str) -> Self {
        Self::with(name, BuildDescriptor::Dockerfile)
    }

    pub fn without_descriptor() -> Self {
        Self {
            repo: None,
            hang: false,
        }
    }

    fn with(name: &str, descriptor: BuildDescriptor) -> Self {
        Self {
            repo: Some(WorkingRepository {
                name: name.to_string(),
                path: Path::new("deploy_workdir").join(name),
                descriptor,
            }),
            hang: false,
        }
    }
}

#[async_trait]
impl SourceStage for FakeStager {
    async fn stage(&self, _config: &DeploymentConfig) -> Result<WorkingRepository, DeployError> {
        if self.hang {
            std::future::pending::<()>().await;
        }
        self.repo
            .clone()
            .ok_or_else(|| DeployError::BuildDescriptorMissing(PathBuf::from("deploy_workdir/shop")))
    }
}

/// Records remote paths it was asked to mirror into
#[derive(Default)]
pub struct FakeSync {
    pub synced: Mutex<Vec<String>>,
    pub hang: bool,
}

impl FakeSync {
    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Default::default()
        }
    }

    pub fn synced(&self) -> Vec<String> {
        self.synced.lock().unwrap().clone()
    }
}

#[async_trait]
impl DirectorySync for FakeSync {
    async fn sync(
        &self,
        _repo: &WorkingRepository,
        _target: &RemoteTarget,
        remote_path: &str,
    ) -> Result<(), DeployError> {
        self.synced.lock().unwrap().push(remote_path.to_string());
        if self.hang {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

/// External probe answering with a fixed status
pub struct FakeProber {
    pub status: u16,
    pub urls: Mutex<Vec<String>>,
}

impl FakeProber {
    pub fn answering(status: u16) -> Self {
        Self {
            status,
            urls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ExternalProbe for FakeProber {
    async fn get_status(&self, url: &Url) -> Result<u16, DeployError> {
        self.urls.lock().unwrap().push(url.to_string());
        Ok(self.status)
    }
}

pub fn target() -> RemoteTarget {
    RemoteTarget::new("ubuntu", "203.0.113.7", "/keys/id")
}

/// Config whose private key is `key_path`
pub fn config(key_path: &Path) -> DeploymentConfig {
    DeploymentConfig {
        repo_url: "https://github.com/acme/shop.git".to_string(),
        token: SecretString::from("tok_123".to_string()),
        branch: "main".to_string(),
        remote_user: "ubuntu".to_string(),
        remote_host: "203.0.113.7".to_string(),
        key_path: key_path.to_path_buf(),
        app_port: 8080,
    }
}

/// Collects formatted log lines emitted on the current thread
#[derive(Clone, Default)]
pub struct LogCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    /// Capture until the returned guard is dropped
    pub fn install() -> (Self, DefaultGuard) {
        let capture = Self::default();
        let writer = capture.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        (capture, tracing::subscriber::set_default(subscriber))
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock().unwrap()).into_owned()
    }

    pub fn count(&self, needle: &str) -> usize {
        self.contents().matches(needle).count()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
