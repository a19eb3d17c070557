//! File operations

use std::path::PathBuf;

use tokio::fs;

/// A file wrapper with path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    path: PathBuf,
}

impl File {
    /// Create a new file reference
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Check if the path exists and is a regular file
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    /// Check that the file can be opened for reading
    pub async fn is_readable(&self) -> bool {
        fs::File::open(&self.path).await.is_ok()
    }
}
