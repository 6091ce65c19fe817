//! Configuration schema types for `assetflow.toml`
//!
//! Defines the structure and validation rules for an asset pipeline project.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use crate::transform::PipelineStep;

/// Which execution-graph group a pipeline belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Core asset pipelines, run in every mode and re-run by the watcher
    #[default]
    Build,
    /// Production-only copy/optimize tasks (fonts, images)
    Assets,
}

/// Project layout section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Project name (required)
    pub name: String,
    /// Source tree, also the development preview root
    #[serde(default = "default_src")]
    pub src: PathBuf,
    /// Distribution root, wiped before every production build
    #[serde(default = "default_dist")]
    pub dist: PathBuf,
}

fn default_src() -> PathBuf {
    PathBuf::from("src")
}

fn default_dist() -> PathBuf {
    PathBuf::from("dist")
}

/// Transform cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache directory, relative to the project root
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
    /// Reuse cached transform outputs
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".assetflow/cache")
}

fn default_true() -> bool {
    true
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { dir: default_cache_dir(), enabled: true }
    }
}

/// Development preview server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Port to bind on localhost
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory to serve (defaults to `project.src`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
}

fn default_port() -> u16 {
    3000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: default_port(), root: None }
    }
}

/// A glob set and the pipelines it re-runs, in order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WatchBindingConfig {
    /// Patterns relative to the project root
    pub globs: Vec<String>,
    /// Pipeline names, run sequentially
    pub pipelines: Vec<String>,
}

/// Watch mode configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Debounce delay in milliseconds
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u32,
    /// Explicit bindings; when empty every build-stage pipeline watches its own sources
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bindings: Vec<WatchBindingConfig>,
}

fn default_debounce_ms() -> u32 {
    100
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { debounce_ms: default_debounce_ms(), bindings: Vec::new() }
    }
}

/// One asset-class pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Unique pipeline name
    pub name: String,
    /// Source globs relative to the project root, processed in order
    pub sources: Vec<String>,
    /// Globs removing matches from `sources` (e.g. Sass partials)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
    /// Development-tree destination, relative to the project root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest: Option<PathBuf>,
    /// Production destination, relative to `project.dist`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dist: Option<PathBuf>,
    /// Graph group
    #[serde(default)]
    pub stage: Stage,
    /// Pipelines of the same stage that must finish first. Required whenever
    /// this pipeline reads another pipeline's `dest`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub after: Vec<String>,
    /// Emit inline source maps in development
    #[serde(default)]
    pub source_maps: bool,
    /// Fail before building when no source matches
    #[serde(default)]
    pub required: bool,
    /// Ordered transform chain; empty means a plain copy
    #[serde(default)]
    pub steps: Vec<PipelineStep>,
}

/// Complete assetflow.toml configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetflowConfig {
    /// Project layout (required)
    pub project: ProjectConfig,
    /// Transform cache
    #[serde(default)]
    pub cache: CacheConfig,
    /// Preview server
    #[serde(default)]
    pub server: ServerConfig,
    /// Watch mode
    #[serde(default)]
    pub watch: WatchConfig,
    /// Pipelines, declared as `[[pipeline]]`
    #[serde(default, rename = "pipeline")]
    pub pipelines: Vec<PipelineConfig>,
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    /// Path to the invalid field (e.g., "pipeline.sass.sources")
    pub field: String,
    /// Error message
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "assetflow.toml: '{}' {}", self.field, self.message)
    }
}

impl AssetflowConfig {
    /// Validate the configuration and return any errors
    pub fn validate(&self) -> Vec<ConfigValidationError> {
        let mut errors = Vec::new();

        if self.project.name.is_empty() {
            errors.push(error("project.name", "must be a non-empty string"));
        }

        let src = normalize(&self.project.src);
        let dist = normalize(&self.project.dist);
        if dist.as_os_str().is_empty() || dist.starts_with("..") {
            errors.push(error("project.dist", "must be a directory inside the project"));
        } else if src.starts_with(&dist) {
            errors.push(error("project.dist", "must not contain the source tree"));
        }

        if self.server.port == 0 {
            errors.push(error("server.port", "must be a positive port number"));
        }

        let mut names = HashSet::new();
        for pipeline in &self.pipelines {
            let prefix = format!("pipeline.{}", pipeline.name);

            if pipeline.name.is_empty() {
                errors.push(error("pipeline.name", "must be a non-empty string"));
            } else if !names.insert(pipeline.name.as_str()) {
                errors.push(error(&prefix, "is declared more than once"));
            }

            if pipeline.sources.is_empty() {
                errors.push(error(
                    &format!("{}.sources", prefix),
                    "must contain at least one glob pattern",
                ));
            }
            for (field, patterns) in [("sources", &pipeline.sources), ("exclude", &pipeline.exclude)] {
                for pattern in patterns {
                    if let Err(e) = glob::Pattern::new(pattern) {
                        errors.push(error(
                            &format!("{}.{}", prefix, field),
                            &format!("has invalid glob '{}': {}", pattern, e),
                        ));
                    }
                }
            }

            if pipeline.dest.is_none() && pipeline.dist.is_none() {
                errors.push(error(&prefix, "must set `dest`, `dist`, or both"));
            }

            if let Some(dist) = &pipeline.dist {
                if dist.is_absolute()
                    || dist.components().any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
                {
                    errors.push(error(
                        &format!("{}.dist", prefix),
                        "must be a relative path inside project.dist",
                    ));
                }
            }
        }

        for pipeline in &self.pipelines {
            let field = format!("pipeline.{}.after", pipeline.name);
            for name in &pipeline.after {
                match self.pipeline(name) {
                    None => errors.push(error(&field, &format!("references unknown pipeline '{}'", name))),
                    Some(other) if other.name == pipeline.name => {
                        errors.push(error(&field, "must not reference the pipeline itself"))
                    }
                    Some(other) if other.stage != pipeline.stage => errors.push(error(
                        &field,
                        &format!("references '{}' from another stage", name),
                    )),
                    Some(_) => {}
                }
            }
        }
        if let Some(name) = self.ordering_cycle() {
            errors.push(error(&format!("pipeline.{}.after", name), "forms a cycle"));
        }

        for (i, binding) in self.watch.bindings.iter().enumerate() {
            let field = format!("watch.bindings[{}]", i);
            if binding.globs.is_empty() {
                errors.push(error(&format!("{}.globs", field), "must not be empty"));
            }
            for pattern in &binding.globs {
                if let Err(e) = glob::Pattern::new(pattern) {
                    errors.push(error(
                        &format!("{}.globs", field),
                        &format!("has invalid glob '{}': {}", pattern, e),
                    ));
                }
            }
            if binding.pipelines.is_empty() {
                errors.push(error(&format!("{}.pipelines", field), "must not be empty"));
            }
            for name in &binding.pipelines {
                if !names.contains(name.as_str()) {
                    errors.push(error(
                        &format!("{}.pipelines", field),
                        &format!("references unknown pipeline '{}'", name),
                    ));
                }
            }
        }

        errors
    }

    /// Check if validation passed
    pub fn is_valid(&self) -> bool {
        self.validate().is_empty()
    }

    /// Look up a pipeline by name
    pub fn pipeline(&self, name: &str) -> Option<&PipelineConfig> {
        self.pipelines.iter().find(|p| p.name == name)
    }

    /// A pipeline whose `after` chain leads back to itself, if any.
    fn ordering_cycle(&self) -> Option<&str> {
        self.pipelines.iter().map(|p| p.name.as_str()).find(|&start| {
            let mut stack: Vec<&str> = vec![start];
            let mut seen = HashSet::new();
            while let Some(name) = stack.pop() {
                let Some(pipeline) = self.pipeline(name) else {
                    continue;
                };
                for dep in &pipeline.after {
                    if dep == start {
                        return true;
                    }
                    if seen.insert(dep.as_str()) {
                        stack.push(dep);
                    }
                }
            }
            false
        })
    }

    /// Watch bindings, falling back to one binding per build-stage pipeline
    pub fn effective_bindings(&self) -> Vec<WatchBindingConfig> {
        if !self.watch.bindings.is_empty() {
            return self.watch.bindings.clone();
        }
        self.pipelines
            .iter()
            .filter(|p| p.stage == Stage::Build)
            .map(|p| WatchBindingConfig {
                globs: p.sources.clone(),
                pipelines: vec![p.name.clone()],
            })
            .collect()
    }
}

fn error(field: &str, message: &str) -> ConfigValidationError {
    ConfigValidationError { field: field.to_string(), message: message.to_string() }
}

/// Drop `.` components so `./dist` and `dist` compare equal.
fn normalize(path: &Path) -> PathBuf {
    path.components().filter(|c| !matches!(c, Component::CurDir)).collect()
}
