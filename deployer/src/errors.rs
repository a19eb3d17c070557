//! Error types for the deployer

use std::path::PathBuf;

use thiserror::Error;

/// Exit status for a run that completed every step
pub const EXIT_SUCCESS: i32 = 0;

/// Exit status for a run that stopped on a fatal step
pub const EXIT_FAILURE: i32 = 1;

/// Exit status for a run cut short by a signal
pub const EXIT_INTERRUPTED: i32 = 2;

/// Main error type for a deployment run
#[derive(Error, Debug)]
pub enum DeployError {
    /// The remote host could not be reached at all
    #[error("Cannot reach {host}: {message}")]
    Connectivity { host: String, message: String },

    /// A local or remote command exited non-zero
    #[error("Step '{step}' failed with exit code {exit_code}: {stderr}")]
    Command {
        step: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("No Dockerfile or compose manifest found in {}", .0.display())]
    BuildDescriptorMissing(PathBuf),

    /// Proxy configuration rejected by the syntax check
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Run interrupted by signal")]
    Interrupted,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl DeployError {
    /// Build a command error from a step name and its captured output
    pub fn command(step: impl Into<String>, exit_code: i32, stderr: impl Into<String>) -> Self {
        DeployError::Command {
            step: step.into(),
            exit_code,
            stderr: stderr.into().trim().to_string(),
        }
    }

    /// Process exit status this error maps to
    pub fn exit_code(&self) -> i32 {
        match self {
            DeployError::Interrupted => EXIT_INTERRUPTED,
            _ => EXIT_FAILURE,
        }
    }

    /// Whether the error is a precondition failure raised before any remote mutation
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            DeployError::Precondition(_) | DeployError::BuildDescriptorMissing(_)
        )
    }
}
