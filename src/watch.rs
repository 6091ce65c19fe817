//! Watch mode: re-run bound pipelines when their sources change.
//!
//! Each [`WatchBinding`] maps a set of globs to an ordered list of pipelines.
//! A debounced batch of filesystem events triggers every binding whose globs
//! match a changed path; the binding's pipelines run sequentially and a single
//! `Completed` event is emitted once the whole chain succeeded.

use glob::{MatchOptions, Pattern};
use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebouncedEventKind};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::channel;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::build::discovery::AssetGlob;
use crate::build::scheduler::{Service, ServiceError};
use crate::build::{BuildContext, PipelineSet};
use crate::cache::TransformCache;
use crate::config::WatchBindingConfig;
use crate::events::{BuildEvent, Notifier};
use crate::mode::BuildMode;

/// Error during watch mode
#[derive(Debug)]
pub enum WatchError {
    /// Failed to initialize file watcher
    WatcherInit(notify::Error),
    /// Failed to add watch path
    WatchPath(notify::Error),
    /// Channel receive error
    ChannelError(String),
    /// A binding glob does not compile
    InvalidGlob(String, glob::PatternError),
    /// A binding names a pipeline that does not exist
    UnknownPipeline(String),
    /// None of the binding base directories exist
    NothingToWatch,
}

impl std::fmt::Display for WatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WatchError::WatcherInit(e) => write!(f, "Failed to initialize file watcher: {}", e),
            WatchError::WatchPath(e) => write!(f, "Failed to watch path: {}", e),
            WatchError::ChannelError(msg) => write!(f, "Watch channel error: {}", msg),
            WatchError::InvalidGlob(pattern, e) => {
                write!(f, "Invalid watch glob '{}': {}", pattern, e)
            }
            WatchError::UnknownPipeline(name) => {
                write!(f, "Watch binding references unknown pipeline '{}'", name)
            }
            WatchError::NothingToWatch => write!(f, "No watch directory exists"),
        }
    }
}

impl std::error::Error for WatchError {}

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Globs mapped to the pipelines they re-run, in order.
#[derive(Debug, Clone)]
pub struct WatchBinding {
    globs: Vec<AssetGlob>,
    patterns: Vec<Pattern>,
    pipelines: Vec<String>,
}

impl WatchBinding {
    pub fn new(globs: &[String], pipelines: Vec<String>) -> Result<Self, WatchError> {
        let globs: Vec<AssetGlob> = globs.iter().map(AssetGlob::new).collect();
        let patterns = globs
            .iter()
            .map(|g| {
                Pattern::new(g.pattern())
                    .map_err(|e| WatchError::InvalidGlob(g.pattern().to_string(), e))
            })
            .collect::<Result<_, _>>()?;
        Ok(Self { globs, patterns, pipelines })
    }

    pub fn from_config(config: &WatchBindingConfig) -> Result<Self, WatchError> {
        Self::new(&config.globs, config.pipelines.clone())
    }

    pub fn pipelines(&self) -> &[String] {
        &self.pipelines
    }

    /// Whether a project-relative path matches any glob.
    pub fn matches(&self, relative: &Path) -> bool {
        self.patterns.iter().any(|p| p.matches_path_with(relative, MATCH_OPTIONS))
    }

    /// Directories to watch, relative to the project root.
    fn roots(&self) -> impl Iterator<Item = &Path> {
        self.globs.iter().map(AssetGlob::base)
    }
}

/// Re-runs pipelines on file changes.
pub struct WatchCoordinator<'a> {
    project_root: PathBuf,
    canonical_root: Option<PathBuf>,
    bindings: Vec<WatchBinding>,
    pipelines: &'a PipelineSet,
    mode: BuildMode,
    cache: &'a TransformCache,
    notifier: &'a dyn Notifier,
    debounce: Duration,
    recently_written: Mutex<HashSet<PathBuf>>,
}

impl<'a> WatchCoordinator<'a> {
    /// Build a coordinator from the context's effective bindings.
    pub fn new(
        ctx: &BuildContext,
        pipelines: &'a PipelineSet,
        cache: &'a TransformCache,
        notifier: &'a dyn Notifier,
    ) -> Result<Self, WatchError> {
        let bindings = ctx
            .config()
            .effective_bindings()
            .iter()
            .map(WatchBinding::from_config)
            .collect::<Result<Vec<_>, _>>()?;

        for binding in &bindings {
            if let Some(name) = binding.pipelines.iter().find(|n| pipelines.get(n).is_none()) {
                return Err(WatchError::UnknownPipeline(name.clone()));
            }
        }

        let project_root = ctx.project_root().to_path_buf();
        Ok(Self {
            canonical_root: project_root.canonicalize().ok(),
            project_root,
            bindings,
            pipelines,
            mode: ctx.mode(),
            cache,
            notifier,
            debounce: Duration::from_millis(u64::from(ctx.config().watch.debounce_ms)),
            recently_written: Mutex::new(HashSet::new()),
        })
    }

    pub fn bindings(&self) -> &[WatchBinding] {
        &self.bindings
    }

    fn relative<'p>(&self, path: &'p Path) -> Option<&'p Path> {
        if path.is_relative() {
            return Some(path);
        }
        path.strip_prefix(&self.project_root)
            .ok()
            .or_else(|| self.canonical_root.as_ref().and_then(|root| path.strip_prefix(root).ok()))
    }

    /// Drop paths this coordinator wrote itself. Each write is ignored once.
    fn filter_own_writes(&self, changed: &[PathBuf]) -> Vec<PathBuf> {
        let Ok(mut recent) = self.recently_written.lock() else {
            return changed.to_vec();
        };
        changed
            .iter()
            .filter(|path| {
                let direct = recent.remove(*path);
                let canonical = path.canonicalize().is_ok_and(|c| recent.remove(&c));
                !(direct || canonical)
            })
            .cloned()
            .collect()
    }

    fn remember_writes(&self, written: &[PathBuf]) {
        if let Ok(mut recent) = self.recently_written.lock() {
            for path in written {
                recent.insert(path.clone());
                if let Ok(canonical) = path.canonicalize() {
                    recent.insert(canonical);
                }
            }
        }
    }

    /// Indices of the bindings triggered by `changed`, in declaration order.
    pub fn triggered(&self, changed: &[PathBuf]) -> Vec<usize> {
        let relative: Vec<&Path> = changed.iter().filter_map(|p| self.relative(p)).collect();
        self.bindings
            .iter()
            .enumerate()
            .filter(|(_, binding)| relative.iter().any(|p| binding.matches(p)))
            .map(|(i, _)| i)
            .collect()
    }

    /// Process one batch of changed paths and return the emitted events.
    pub fn handle_changes(&self, changed: &[PathBuf]) -> Vec<BuildEvent> {
        let changed = self.filter_own_writes(changed);
        let mut events = Vec::new();

        for index in self.triggered(&changed) {
            let binding = &self.bindings[index];
            let event = self.run_chain(binding.pipelines());
            self.notifier.notify(&event);
            events.push(event);
        }
        events
    }

    /// Run pipelines in order, stopping at the first failure.
    fn run_chain(&self, names: &[String]) -> BuildEvent {
        let start = Instant::now();
        let mut written = Vec::new();

        for name in names {
            let Some(pipeline) = self.pipelines.get(name) else {
                continue;
            };
            match pipeline.run(self.mode, self.cache) {
                Ok(files) => {
                    self.remember_writes(&files);
                    written.extend(files);
                }
                Err(error) => return BuildEvent::Failed { pipeline: name.clone(), error },
            }
        }

        tracing::debug!("Rebuilt {} in {:?}", names.join(" -> "), start.elapsed());
        BuildEvent::Completed { pipelines: names.to_vec(), written }
    }

    /// Existing directories covering every binding, without nested duplicates.
    fn watch_roots(&self) -> Vec<PathBuf> {
        let mut roots: Vec<PathBuf> = self
            .bindings
            .iter()
            .flat_map(|binding| binding.roots())
            .map(|base| self.project_root.join(base))
            .collect();
        roots.sort();
        roots.dedup();

        let mut selected: Vec<PathBuf> = Vec::new();
        for root in roots {
            if !root.is_dir() {
                tracing::warn!("Watch directory not found: {}", root.display());
                continue;
            }
            if !selected.iter().any(|s| root.starts_with(s)) {
                selected.push(root);
            }
        }
        selected
    }

    /// Watch for changes until the channel closes.
    pub fn watch(&self) -> Result<(), WatchError> {
        let roots = self.watch_roots();
        if roots.is_empty() {
            return Err(WatchError::NothingToWatch);
        }

        let (tx, rx) = channel();
        let mut debouncer = new_debouncer(self.debounce, tx).map_err(WatchError::WatcherInit)?;
        for root in &roots {
            debouncer
                .watcher()
                .watch(root, RecursiveMode::Recursive)
                .map_err(WatchError::WatchPath)?;
        }
        tracing::info!("Watching {} directories for changes", roots.len());

        loop {
            match rx.recv() {
                Ok(Ok(events)) => {
                    let changed: Vec<PathBuf> = events
                        .into_iter()
                        .filter(|e| matches!(e.kind, DebouncedEventKind::Any))
                        .map(|e| e.path)
                        .collect();
                    if !changed.is_empty() {
                        for path in &changed {
                            tracing::debug!("Changed: {}", path.display());
                        }
                        self.handle_changes(&changed);
                    }
                }
                Ok(Err(error)) => {
                    // Non-fatal; keep watching
                    tracing::warn!("Watch error: {:?}", error);
                }
                Err(e) => return Err(WatchError::ChannelError(e.to_string())),
            }
        }
    }
}

impl Service for WatchCoordinator<'_> {
    fn name(&self) -> &str {
        "watcher"
    }

    fn run(&self) -> Result<(), ServiceError> {
        self.watch().map_err(Into::into)
    }
}
