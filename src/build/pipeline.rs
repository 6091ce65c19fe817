//! Pipelines: named, immutable transform chains built from configuration.
//!
//! An invocation discovers inputs, runs every step admitted by the build mode
//! in memory, and only then writes to the destination roots. A failing step
//! leaves every destination untouched.

use crate::build::discovery::{discover_sources, AssetGlob};
use crate::build::{BuildContext, PipelineResult};
use crate::cache::TransformCache;
use crate::config::{ConfigError, PipelineConfig, Stage};
use crate::events::{BuildEvent, Notifier};
use crate::mode::BuildMode;
use crate::transform::{AssetFile, PipelineStep, TransformContext, TransformError};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Absolute paths written by one invocation, in write order.
pub type WrittenFiles = Vec<PathBuf>;

/// Destination roots of a pipeline, both absolute.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Destinations {
    /// Development (preview) tree, written in every mode
    pub dest: Option<PathBuf>,
    /// Subdirectory of the distribution root, written in production only
    pub dist: Option<PathBuf>,
}

impl Destinations {
    /// Roots written in `mode`, primary first.
    pub fn roots(&self, mode: BuildMode) -> Vec<&Path> {
        let mut roots = Vec::with_capacity(2);
        if let Some(dest) = &self.dest {
            roots.push(dest.as_path());
        }
        if mode.is_production() {
            if let Some(dist) = &self.dist {
                roots.push(dist.as_path());
            }
        }
        roots
    }
}

/// A named asset pipeline.
#[derive(Debug, Clone)]
pub struct Pipeline {
    name: String,
    sources: Vec<AssetGlob>,
    exclude: Vec<AssetGlob>,
    destinations: Destinations,
    stage: Stage,
    after: Vec<String>,
    source_maps: bool,
    required: bool,
    steps: Vec<PipelineStep>,
    project_root: PathBuf,
}

impl Pipeline {
    /// Build a pipeline from its configuration.
    pub fn from_config(config: &PipelineConfig, ctx: &BuildContext) -> Self {
        let dist_root = ctx.dist_dir();
        Self {
            name: config.name.clone(),
            sources: config.sources.iter().map(AssetGlob::new).collect(),
            exclude: config.exclude.iter().map(AssetGlob::new).collect(),
            destinations: Destinations {
                dest: config.dest.as_deref().map(|p| ctx.resolve_path(p)),
                dist: config.dist.as_deref().map(|p| dist_root.join(p)),
            },
            stage: config.stage,
            after: config.after.clone(),
            source_maps: config.source_maps,
            required: config.required,
            steps: config.steps.clone(),
            project_root: ctx.project_root().to_path_buf(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn sources(&self) -> &[AssetGlob] {
        &self.sources
    }

    pub fn exclude(&self) -> &[AssetGlob] {
        &self.exclude
    }

    /// Same-stage pipelines that must finish before this one starts.
    pub fn after(&self) -> &[String] {
        &self.after
    }

    pub fn destinations(&self) -> &Destinations {
        &self.destinations
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    /// Whether source maps are emitted in `mode`.
    pub fn source_maps_active(&self, mode: BuildMode) -> bool {
        self.source_maps && mode.is_development()
    }

    /// Steps that run in `mode`, in declared order.
    pub fn active_steps(&self, mode: BuildMode) -> impl Iterator<Item = &PipelineStep> {
        self.steps.iter().filter(move |s| s.applies_to(mode))
    }

    /// Read every source file, in discovery order.
    fn load_inputs(&self) -> Result<Vec<AssetFile>, TransformError> {
        let sources = discover_sources(&self.project_root, &self.sources, &self.exclude)
            .map_err(|e| TransformError::new("discover", e.to_string()))?;

        sources
            .into_iter()
            .map(|source| {
                let contents = fs::read(&source.path).map_err(|e| {
                    TransformError::new("read", e.to_string()).with_file(&source.path)
                })?;
                Ok(AssetFile::new(source.path, source.relative, contents))
            })
            .collect()
    }

    /// Transform all inputs without writing anything.
    pub fn transform(
        &self,
        mode: BuildMode,
        cache: &TransformCache,
    ) -> Result<Vec<AssetFile>, TransformError> {
        let ctx = TransformContext {
            mode,
            source_maps: self.source_maps_active(mode),
            project_root: &self.project_root,
            cache,
        };

        let mut files = self.load_inputs().map_err(|e| e.in_pipeline(&self.name))?;
        if files.is_empty() {
            tracing::debug!("{}: no sources matched", self.name);
        }

        for step in self.active_steps(mode) {
            tracing::trace!("{}: {} ({} files)", self.name, step.step.label(), files.len());
            files = step.step.apply(files, &ctx).map_err(|e| e.in_pipeline(&self.name))?;
        }
        Ok(files)
    }

    /// Run the pipeline once and write its outputs.
    pub fn run(
        &self,
        mode: BuildMode,
        cache: &TransformCache,
    ) -> Result<WrittenFiles, TransformError> {
        let files = self.transform(mode, cache)?;

        let mut written = Vec::new();
        for root in self.destinations.roots(mode) {
            for file in &files {
                let target = root.join(&file.path);
                write_file(&target, &file.contents).map_err(|e| {
                    TransformError::new("write", e.to_string())
                        .with_file(&target)
                        .in_pipeline(&self.name)
                })?;
                written.push(target);
            }
        }
        Ok(written)
    }

    /// Run the pipeline, notify the outcome and report it.
    ///
    /// Failures never propagate: they become a `Failed` event and a failed
    /// result. Logging is left to the notifier.
    pub fn invoke(
        &self,
        mode: BuildMode,
        cache: &TransformCache,
        notifier: &dyn Notifier,
    ) -> PipelineResult {
        let start = Instant::now();
        tracing::debug!("Running pipeline {}", self.name);

        match self.run(mode, cache) {
            Ok(written) => {
                let duration = start.elapsed();
                tracing::debug!("{}: {} files in {:?}", self.name, written.len(), duration);
                notifier.notify(&BuildEvent::Completed {
                    pipelines: vec![self.name.clone()],
                    written: written.clone(),
                });
                PipelineResult::success(self.name.clone(), written, duration)
            }
            Err(error) => {
                let duration = start.elapsed();
                let message = error.to_string();
                notifier.notify(&BuildEvent::Failed { pipeline: self.name.clone(), error });
                PipelineResult::failed(self.name.clone(), message, duration)
            }
        }
    }
}

/// Replace `path` atomically: readers see the old contents or the new, never a prefix.
fn write_file(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    let tmp = path.with_file_name(format!(".{}.{}.tmp", name, std::process::id()));
    fs::write(&tmp, contents)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

/// Every pipeline of a project, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct PipelineSet {
    pipelines: Vec<Pipeline>,
}

impl PipelineSet {
    /// Build pipelines from a validated context.
    ///
    /// Fails when the configuration is invalid, the source root is missing,
    /// or a required pipeline matches no file.
    pub fn from_context(ctx: &BuildContext) -> Result<Self, ConfigError> {
        let errors = ctx.config().validate();
        if !errors.is_empty() {
            return Err(ConfigError::Validation(errors.iter().map(|e| e.to_string()).collect()));
        }

        let src_dir = ctx.src_dir();
        if !src_dir.is_dir() {
            return Err(ConfigError::MissingPath {
                what: "source root".to_string(),
                path: src_dir,
            });
        }

        let set = Self::from_pipelines(
            ctx.config().pipelines.iter().map(|p| Pipeline::from_config(p, ctx)).collect(),
        );

        for pipeline in set.iter().filter(|p| p.is_required()) {
            let found = discover_sources(ctx.project_root(), pipeline.sources(), pipeline.exclude())
                .map_err(|e| ConfigError::Validation(vec![e.to_string()]))?;
            if found.is_empty() {
                return Err(ConfigError::MissingSources {
                    pipeline: pipeline.name().to_string(),
                    patterns: pipeline.sources().iter().map(|g| g.pattern().to_string()).collect(),
                });
            }
        }

        Ok(set)
    }

    pub fn from_pipelines(pipelines: Vec<Pipeline>) -> Self {
        Self { pipelines }
    }

    pub fn get(&self, name: &str) -> Option<&Pipeline> {
        self.pipelines.iter().find(|p| p.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pipeline> {
        self.pipelines.iter()
    }

    /// Names of the pipelines in `stage`, in declaration order.
    pub fn names_in_stage(&self, stage: Stage) -> Vec<String> {
        self.pipelines.iter().filter(|p| p.stage == stage).map(|p| p.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }
}
