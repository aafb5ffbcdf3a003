//! Plugin module fetching

use crate::error::{Result, SandboxError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Fetches plugin module source by url
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ModuleFetcher: Send + Sync {
    async fn fetch(&self, module_url: &str) -> Result<String>;
}

/// Reads modules from the local filesystem.
///
/// Accepts bare paths and `file://` urls; relative paths resolve against
/// the base directory.
#[derive(Debug, Clone)]
pub struct FileFetcher {
    base_dir: PathBuf,
}

impl FileFetcher {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Map a module url to a file path
    pub fn resolve(&self, module_url: &str) -> Result<PathBuf> {
        let raw = match module_url.strip_prefix("file://") {
            Some(path) => path,
            None if module_url.contains("://") => {
                return Err(SandboxError::Config(format!(
                    "Unsupported module url scheme: {}",
                    module_url
                )))
            }
            None => module_url,
        };

        if raw.is_empty() {
            return Err(SandboxError::Config("Empty module url".to_string()));
        }

        let path = Path::new(raw);
        Ok(if path.is_relative() {
            self.base_dir.join(path)
        } else {
            path.to_path_buf()
        })
    }
}

#[async_trait]
impl ModuleFetcher for FileFetcher {
    async fn fetch(&self, module_url: &str) -> Result<String> {
        let path = self.resolve(module_url)?;
        tracing::debug!("Fetching plugin module {:?}", path);
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| SandboxError::Io(e).with_context(format!("Reading {:?}", path)))
    }
}
