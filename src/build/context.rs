//! Build context containing configuration and state for a build.

use crate::cache::TransformCache;
use crate::config::AssetflowConfig;
use crate::mode::BuildMode;
use std::path::{Path, PathBuf};

/// Build context containing configuration and paths for a build operation.
///
/// Created once per process after mode resolution and config loading, then
/// passed by reference to everything that needs it.
#[derive(Debug, Clone)]
pub struct BuildContext {
    /// The loaded configuration
    config: AssetflowConfig,
    /// Project root directory (where assetflow.toml is located)
    project_root: PathBuf,
    /// Active build mode, fixed for the process lifetime
    mode: BuildMode,
}

impl BuildContext {
    /// Create a new build context.
    ///
    /// # Arguments
    /// - `config` - The loaded configuration
    /// - `project_root` - The project root directory
    /// - `mode` - The resolved build mode
    pub fn new(config: AssetflowConfig, project_root: PathBuf, mode: BuildMode) -> Self {
        Self { config, project_root, mode }
    }

    /// Get the configuration.
    pub fn config(&self) -> &AssetflowConfig {
        &self.config
    }

    /// Get the project root directory.
    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn mode(&self) -> BuildMode {
        self.mode
    }

    /// Get the source directory (resolved to absolute path).
    pub fn src_dir(&self) -> PathBuf {
        self.resolve_path(&self.config.project.src)
    }

    /// Get the distribution root (resolved to absolute path).
    pub fn dist_dir(&self) -> PathBuf {
        self.resolve_path(&self.config.project.dist)
    }

    /// Get the transform cache directory (resolved to absolute path).
    pub fn cache_dir(&self) -> PathBuf {
        self.resolve_path(&self.config.cache.dir)
    }

    /// Directory the preview server serves; defaults to the source tree.
    pub fn server_root(&self) -> PathBuf {
        match &self.config.server.root {
            Some(root) => self.resolve_path(root),
            None => self.src_dir(),
        }
    }

    /// Open the transform cache described by the configuration.
    pub fn cache(&self) -> TransformCache {
        TransformCache::new(self.cache_dir(), self.config.cache.enabled)
    }

    /// Resolve a path relative to the project root.
    ///
    /// If the path is absolute, returns it unchanged.
    /// If relative, joins it with the project root.
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        crate::config::resolve_path(&self.project_root, path)
    }
}
