//! Logging configuration
//!
//! Every event goes to stdout and to the run log, a timestamp-named file
//! that is created when the run starts and only ever appended to.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use secrecy::{ExposeSecret, SecretString};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::errors::DeployError;

/// Default directory for run logs
pub const DEFAULT_LOG_DIR: &str = "logs";

/// Placeholder written in place of any secret value
pub const REDACTED: &str = "***";

/// Log level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn to_filter_string(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(format!("Invalid log level: {}", s)),
        }
    }
}

/// Logging options
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Log level
    pub log_level: LogLevel,

    /// Directory holding the run logs
    pub log_dir: PathBuf,

    /// Enable JSON format on stdout
    pub json_format: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            json_format: false,
        }
    }
}

/// Handle on the run log of one invocation
///
/// Dropping it flushes the buffered file writer, so `main` keeps it alive
/// until the process exits.
pub struct RunLog {
    path: PathBuf,
    writer: NonBlocking,
    _guard: WorkerGuard,
}

impl RunLog {
    /// Create the run log file for a run started at `started_at`
    pub fn open(log_dir: &Path, started_at: DateTime<Local>) -> Result<Self, DeployError> {
        std::fs::create_dir_all(log_dir)?;
        let file_name = run_log_file_name(started_at);
        let appender = tracing_appender::rolling::never(log_dir, &file_name);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        Ok(Self {
            path: log_dir.join(file_name),
            writer,
            _guard: guard,
        })
    }

    /// Location of the run log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writer shared with the file logging layer
    pub fn writer(&self) -> NonBlocking {
        self.writer.clone()
    }

    /// Append text printed outside of `tracing`, such as the final summary
    pub fn record(&self, text: &str) -> std::io::Result<()> {
        let mut writer = self.writer();
        writer.write_all(text.as_bytes())?;
        if !text.ends_with('\n') {
            writer.write_all(b"\n")?;
        }
        Ok(())
    }
}

/// File name of the run log for a run started at `started_at`
pub fn run_log_file_name(started_at: DateTime<Local>) -> String {
    format!("deploy_{}.log", started_at.format("%Y%m%d_%H%M%S"))
}

/// Initialize logging to stdout and to a fresh run log
pub fn init_logging(options: LogOptions, started_at: DateTime<Local>) -> Result<RunLog, DeployError> {
    let run_log = RunLog::open(&options.log_dir, started_at)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(options.log_level.to_filter_string()));

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_ansi(false).with_writer(run_log.writer()));

    if options.json_format {
        subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| DeployError::Config(e.to_string()))?;
    } else {
        subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| DeployError::Config(e.to_string()))?;
    }

    Ok(run_log)
}

/// Replaces per-run secrets in captured output before it is logged
#[derive(Debug, Default)]
pub struct Scrubber {
    secrets: Vec<SecretString>,
}

impl Scrubber {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a secret; empty values are ignored
    pub fn with_secret(mut self, secret: &SecretString) -> Self {
        let value = secret.expose_secret();
        if !value.is_empty() {
            self.secrets.push(SecretString::from(value.to_string()));
        }
        self
    }

    pub fn scrub(&self, text: &str) -> String {
        let mut out = text.to_string();
        for secret in &self.secrets {
            out = out.replace(secret.expose_secret(), REDACTED);
        }
        out
    }
}
