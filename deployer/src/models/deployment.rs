//! Deployment models

use std::fmt;
use std::path::PathBuf;

use colored::Colorize;
use serde::{Deserialize, Serialize};

use crate::errors::DeployError;
use crate::filesys::dir::Dir;

/// Compose manifests, in detection order
pub const COMPOSE_MANIFESTS: [&str; 4] = [
    "docker-compose.yml",
    "docker-compose.yaml",
    "compose.yml",
    "compose.yaml",
];

pub const DOCKERFILE: &str = "Dockerfile";

/// Port the reverse proxy listens on
pub const PUBLIC_PORT: u16 = 80;

/// How the staged repository is turned into running containers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum BuildDescriptor {
    /// A compose manifest at the repository root
    Compose { manifest: String },

    /// A bare Dockerfile at the repository root
    Dockerfile,
}

impl BuildDescriptor {
    /// Classify a checkout; a compose manifest wins over a Dockerfile
    pub async fn detect(dir: &Dir) -> Option<Self> {
        if let Some(manifest) = dir.first_file_of(&COMPOSE_MANIFESTS).await {
            return Some(BuildDescriptor::Compose { manifest });
        }
        if dir.file(DOCKERFILE).exists().await {
            return Some(BuildDescriptor::Dockerfile);
        }
        None
    }
}

impl fmt::Display for BuildDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildDescriptor::Compose { manifest } => write!(f, "compose ({})", manifest),
            BuildDescriptor::Dockerfile => write!(f, "Dockerfile"),
        }
    }
}

/// The locally staged checkout of the application repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingRepository {
    /// Basename of the repository URL, without `.git`
    pub name: String,

    pub path: PathBuf,

    pub descriptor: BuildDescriptor,
}

impl WorkingRepository {
    /// Derive the repository name from its URL.
    ///
    /// Handles `https://host/org/app.git`, `git@host:org/app.git` and
    /// trailing slashes.
    pub fn name_from_url(url: &str) -> Result<String, DeployError> {
        let trimmed = url.trim().trim_end_matches('/');
        let base = trimmed
            .rsplit(['/', ':'])
            .next()
            .unwrap_or_default();
        let name = base.strip_suffix(".git").unwrap_or(base);
        if name.is_empty() || name == "." || name == ".." {
            return Err(DeployError::Precondition(format!(
                "cannot derive a repository name from '{}'",
                url
            )));
        }
        Ok(name.to_string())
    }

    /// Lowercased name, used as the image repository
    pub fn slug(&self) -> String {
        self.name.to_lowercase()
    }

    /// Name for `docker compose -p`, which must match `^[a-z0-9][a-z0-9_-]*$`.
    ///
    /// Any other character becomes `-`; leading separators are dropped.
    pub fn compose_project(&self) -> String {
        let mapped: String = self
            .name
            .chars()
            .map(|c| match c.to_ascii_lowercase() {
                c @ ('a'..='z' | '0'..='9' | '_' | '-') => c,
                _ => '-',
            })
            .collect();
        let project = mapped.trim_start_matches(|c: char| !c.is_ascii_alphanumeric());
        if project.is_empty() {
            COMPOSE_FALLBACK_PROJECT.to_string()
        } else {
            project.to_string()
        }
    }
}

/// Compose project used when nothing of the repository name survives
const COMPOSE_FALLBACK_PROJECT: &str = "app";

/// Reverse proxy route from the public port to a loopback upstream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRoute {
    /// Site identifier; one site file per repository
    pub site_name: String,
    pub public_port: u16,
    pub upstream_port: u16,
}

impl ProxyRoute {
    pub fn new(site_name: impl Into<String>, upstream_port: u16) -> Self {
        Self {
            site_name: site_name.into(),
            public_port: PUBLIC_PORT,
            upstream_port,
        }
    }

    pub fn upstream(&self) -> String {
        format!("http://127.0.0.1:{}", self.upstream_port)
    }

    /// nginx server block for this route, with upgrade headers passed through
    pub fn render(&self) -> String {
        format!(
            r#"server {{
    listen {port};
    listen [::]:{port};
    server_name _;

    location / {{
        proxy_pass {upstream};
        proxy_http_version 1.1;
        proxy_set_header Upgrade $http_upgrade;
        proxy_set_header Connection "upgrade";
        proxy_set_header Host $host;
        proxy_set_header X-Real-IP $remote_addr;
        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
        proxy_set_header X-Forwarded-Proto $scheme;
        proxy_cache_bypass $http_upgrade;
    }}
}}
"#,
            port = self.public_port,
            upstream = self.upstream(),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    Passed,
    Failed,
}

/// Result of one post-deploy probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub name: String,
    pub status: ProbeStatus,
    pub detail: String,
}

impl ProbeResult {
    pub fn passed(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: ProbeStatus::Passed,
            detail: detail.into(),
        }
    }

    pub fn failed(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: ProbeStatus::Failed,
            detail: detail.into(),
        }
    }
}

/// Observations collected after a deploy; never rolls anything back
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub probes: Vec<ProbeResult>,
}

impl ValidationReport {
    pub fn push(&mut self, probe: ProbeResult) {
        self.probes.push(probe);
    }

    pub fn all_passed(&self) -> bool {
        self.probes.iter().all(|p| p.status == ProbeStatus::Passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ProbeResult> {
        self.probes
            .iter()
            .filter(|p| p.status == ProbeStatus::Failed)
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for probe in &self.probes {
            let mark = match probe.status {
                ProbeStatus::Passed => "PASS".green().bold(),
                ProbeStatus::Failed => "FAIL".red().bold(),
            };
            writeln!(f, "  [{}] {}: {}", mark, probe.name, probe.detail)?;
        }
        Ok(())
    }
}
