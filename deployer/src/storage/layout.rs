//! Local and remote storage layout

use std::path::PathBuf;

use crate::filesys::dir::Dir;
use crate::remote::target::RemoteTarget;

/// Default local staging root, relative to the working directory
pub const DEFAULT_STAGING_ROOT: &str = "deploy_workdir";

const NGINX_SITES_AVAILABLE: &str = "/etc/nginx/sites-available";
const NGINX_SITES_ENABLED: &str = "/etc/nginx/sites-enabled";

/// Local storage layout for the deployer
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Root under which repositories are staged
    pub staging_root: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(staging_root: impl Into<PathBuf>) -> Self {
        Self {
            staging_root: staging_root.into(),
        }
    }

    /// Get the staging root directory
    pub fn staging_dir(&self) -> Dir {
        Dir::new(&self.staging_root)
    }

    /// Get the checkout directory of a repository
    pub fn repository_dir(&self, name: &str) -> Dir {
        self.staging_dir().subdir(name)
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        Self::new(DEFAULT_STAGING_ROOT)
    }
}

/// Where things live on the remote host, all derived from the repository name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteLayout {
    home: String,
}

impl RemoteLayout {
    pub fn for_target(target: &RemoteTarget) -> Self {
        Self {
            home: target.home_dir(),
        }
    }

    /// Application code directory
    pub fn app_dir(&self, repo: &str) -> String {
        format!("{}/{}", self.home, repo)
    }

    pub fn site_available(&self, repo: &str) -> String {
        format!("{}/{}.conf", NGINX_SITES_AVAILABLE, repo)
    }

    /// Copy of the previous site file, kept until the new one passes `nginx -t`.
    ///
    /// Lives beside the site so nginx never includes it.
    pub fn site_backup(&self, repo: &str) -> String {
        format!("{}/{}.conf.bak", NGINX_SITES_AVAILABLE, repo)
    }

    pub fn site_enabled(&self, repo: &str) -> String {
        format!("{}/{}.conf", NGINX_SITES_ENABLED, repo)
    }

    /// The site nginx ships enabled by default
    pub fn default_site_enabled(&self) -> String {
        format!("{}/default", NGINX_SITES_ENABLED)
    }
}
