//! Run configuration
//!
//! Each deployment value is taken from `--key=value`, then from its
//! environment variable, then from the operator (or the default when the
//! run is non-interactive). The result is immutable for the rest of the run.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use tracing::warn;

use crate::app::prompt::Prompter;
use crate::deploy::runner::RunnerSettings;
use crate::errors::DeployError;
use crate::filesys::file::File;
use crate::logs::{LogLevel, LogOptions, DEFAULT_LOG_DIR};
use crate::remote::target::RemoteTarget;
use crate::storage::layout::{StorageLayout, DEFAULT_STAGING_ROOT};

/// Command line arguments as a `key -> value` map
pub type ArgMap = HashMap<String, String>;

/// Parse `--key=value` pairs and bare `--flag`s (stored as `"true"`)
pub fn parse_args(args: impl IntoIterator<Item = String>) -> ArgMap {
    let mut map = ArgMap::new();
    for arg in args {
        if let Some((key, value)) = arg.split_once('=') {
            let clean_key = key.trim_start_matches('-');
            map.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            let clean_key = arg.trim_start_matches('-');
            map.insert(clean_key.to_string(), "true".to_string());
        }
    }
    map
}

/// One configurable deployment value
#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub arg: &'static str,
    pub env: &'static str,
    pub label: &'static str,
    pub default: Option<&'static str>,
}

pub const REPO_URL: Field = Field {
    arg: "repo",
    env: "DEPLOY_REPO_URL",
    label: "Repository URL",
    default: None,
};

pub const TOKEN: Field = Field {
    arg: "token",
    env: "DEPLOY_TOKEN",
    label: "Access token",
    default: None,
};

pub const BRANCH: Field = Field {
    arg: "branch",
    env: "DEPLOY_BRANCH",
    label: "Branch",
    default: Some("main"),
};

pub const REMOTE_USER: Field = Field {
    arg: "user",
    env: "DEPLOY_USER",
    label: "Remote user",
    default: Some("ubuntu"),
};

pub const REMOTE_HOST: Field = Field {
    arg: "host",
    env: "DEPLOY_HOST",
    label: "Remote host",
    default: None,
};

pub const KEY_PATH: Field = Field {
    arg: "key",
    env: "DEPLOY_KEY_PATH",
    label: "Private key path",
    default: Some("~/.ssh/id_rsa"),
};

pub const APP_PORT: Field = Field {
    arg: "port",
    env: "DEPLOY_PORT",
    label: "Application port",
    default: Some("3000"),
};

/// Immutable per-run deployment values
#[derive(Debug)]
pub struct DeploymentConfig {
    pub repo_url: String,
    pub token: SecretString,
    pub branch: String,
    pub remote_user: String,
    pub remote_host: String,
    pub key_path: PathBuf,
    pub app_port: u16,
}

impl DeploymentConfig {
    /// Check every field before any remote action
    pub fn validate(&self) -> Result<(), DeployError> {
        let required = [
            (REPO_URL.label, self.repo_url.as_str()),
            (TOKEN.label, self.token.expose_secret()),
            (BRANCH.label, self.branch.as_str()),
            (REMOTE_USER.label, self.remote_user.as_str()),
            (REMOTE_HOST.label, self.remote_host.as_str()),
        ];
        for (label, value) in required {
            if value.trim().is_empty() {
                return Err(DeployError::Precondition(format!("{} must not be empty", label)));
            }
        }
        if self.key_path.as_os_str().is_empty() {
            return Err(DeployError::Precondition(format!(
                "{} must not be empty",
                KEY_PATH.label
            )));
        }
        if self.app_port == 0 {
            return Err(DeployError::Precondition(
                "Application port must be a positive integer".to_string(),
            ));
        }
        if let Ok(url) = url::Url::parse(&self.repo_url) {
            if !url.username().is_empty() || url.password().is_some() {
                return Err(DeployError::Precondition(
                    "Repository URL must not embed credentials; pass the token separately"
                        .to_string(),
                ));
            }
        }
        Ok(())
    }

    /// The private key must be readable before the first connection
    pub async fn ensure_key_readable(&self) -> Result<(), DeployError> {
        if File::new(&self.key_path).is_readable().await {
            Ok(())
        } else {
            Err(DeployError::Precondition(format!(
                "private key {} is not readable",
                self.key_path.display()
            )))
        }
    }

    pub fn target(&self) -> RemoteTarget {
        RemoteTarget::new(&self.remote_user, &self.remote_host, &self.key_path)
    }
}

/// Options controlling the run itself rather than what is deployed
#[derive(Debug, Clone)]
pub struct AppOptions {
    pub layout: StorageLayout,
    pub log: LogOptions,
    pub interactive: bool,
    pub runner: RunnerSettings,
}

impl AppOptions {
    pub fn from_args(args: &ArgMap) -> Result<Self, DeployError> {
        let log_level = match args.get("log-level") {
            Some(level) => level.parse::<LogLevel>().map_err(DeployError::Config)?,
            None => LogLevel::default(),
        };
        let staging_root = args
            .get("workdir")
            .cloned()
            .unwrap_or_else(|| DEFAULT_STAGING_ROOT.to_string());
        let logs_dir = args
            .get("logs-dir")
            .cloned()
            .unwrap_or_else(|| DEFAULT_LOG_DIR.to_string());

        Ok(Self {
            layout: StorageLayout::new(staging_root),
            log: LogOptions {
                log_level,
                log_dir: PathBuf::from(logs_dir),
                json_format: args.get("log-format").map(String::as_str) == Some("json"),
            },
            interactive: !args.contains_key("non-interactive"),
            runner: RunnerSettings::default(),
        })
    }
}

/// Collect the deployment config from arguments, environment and prompts.
///
/// `prompter` is `None` for non-interactive runs, where a missing value
/// without a default is a precondition failure.
pub async fn collect_config(
    args: &ArgMap,
    env: &(dyn Fn(&str) -> Option<String> + Sync),
    prompter: Option<&dyn Prompter>,
) -> Result<DeploymentConfig, DeployError> {
    let repo_url = resolve(&REPO_URL, args, env, prompter).await?;
    let token = SecretString::from(resolve(&TOKEN, args, env, prompter).await?);
    let branch = resolve(&BRANCH, args, env, prompter).await?;
    let remote_user = resolve(&REMOTE_USER, args, env, prompter).await?;
    let remote_host = resolve(&REMOTE_HOST, args, env, prompter).await?;
    let key_path = expand_home(&resolve(&KEY_PATH, args, env, prompter).await?, env);
    let port = resolve(&APP_PORT, args, env, prompter).await?;
    let app_port = port.trim().parse::<u16>().map_err(|_| {
        DeployError::Precondition(format!("Application port '{}' is not a valid port", port))
    })?;

    let config = DeploymentConfig {
        repo_url,
        token,
        branch,
        remote_user,
        remote_host,
        key_path,
        app_port,
    };
    config.validate()?;
    Ok(config)
}

async fn resolve(
    field: &Field,
    args: &ArgMap,
    env: &(dyn Fn(&str) -> Option<String> + Sync),
    prompter: Option<&dyn Prompter>,
) -> Result<String, DeployError> {
    let given = args
        .get(field.arg)
        .cloned()
        .or_else(|| env(field.env))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
    if let Some(value) = given {
        return Ok(value);
    }

    let Some(prompter) = prompter else {
        return field.default.map(str::to_string).ok_or_else(|| {
            DeployError::Precondition(format!(
                "{} is required (--{}=... or {})",
                field.label, field.arg, field.env
            ))
        });
    };

    loop {
        let answer = prompter.ask(field.label, field.default).await?;
        let answer = answer.trim().to_string();
        if !answer.is_empty() {
            return Ok(answer);
        }
        if let Some(default) = field.default {
            return Ok(default.to_string());
        }
        warn!("{} cannot be empty", field.label);
    }
}

fn expand_home(path: &str, env: &(dyn Fn(&str) -> Option<String> + Sync)) -> PathBuf {
    match (path.strip_prefix("~/"), env("HOME")) {
        (Some(rest), Some(home)) => Path::new(&home).join(rest),
        _ => PathBuf::from(path),
    }
}
