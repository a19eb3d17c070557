//! Remote host addressing

use std::path::PathBuf;
use std::time::Duration;

/// Timeout applied to the initial connectivity probe only
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// A single addressable machine: (user, host, key path)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub user: String,
    pub host: String,
    pub key_path: PathBuf,
}

impl RemoteTarget {
    pub fn new(user: impl Into<String>, host: impl Into<String>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            user: user.into(),
            host: host.into(),
            key_path: key_path.into(),
        }
    }

    /// `user@host`
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    /// Home directory of the remote user
    pub fn home_dir(&self) -> String {
        if self.user == "root" {
            "/root".to_string()
        } else {
            format!("/home/{}", self.user)
        }
    }

    /// Option set shared by every ssh and rsync invocation.
    ///
    /// Host key verification is disabled for the run: the host key is
    /// neither checked nor recorded.
    pub fn ssh_options(&self, connect_timeout: Option<Duration>) -> Vec<String> {
        let mut opts = vec![
            "-i".to_string(),
            self.key_path.display().to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "LogLevel=ERROR".to_string(),
        ];
        if let Some(timeout) = connect_timeout {
            opts.push("-o".to_string());
            opts.push(format!("ConnectTimeout={}", timeout.as_secs()));
        }
        opts
    }
}
