//! Project commands (build, clear, init)

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use thiserror::Error;

use super::{EXIT_ERROR, EXIT_SUCCESS};
use crate::build::{BuildContext, ExecutionGraph, PipelineSet, Scheduler};
use crate::cache::ClearOutcome;
use crate::config::{
    default_config, find_config, load_config, merge_cli_overrides, AssetflowConfig, CliOverrides,
    ConfigError, CONFIG_FILE_NAME,
};
use crate::events::{LogNotifier, NotifierSet};
use crate::mode::resolve_mode;
use crate::server::{DevServer, ReloadHub};
use crate::watch::WatchCoordinator;

/// Arguments of `aflow build`
#[derive(Debug, Default)]
pub struct BuildArgs {
    pub config: Option<PathBuf>,
    pub port: Option<u16>,
    pub no_serve: bool,
    pub no_watch: bool,
    pub no_cache: bool,
    pub dry_run: bool,
}

/// Locate and load the configuration, returning it with the project root.
///
/// An explicit path must exist. Without one, the nearest `assetflow.toml`
/// is used, falling back to the built-in defaults rooted at the working
/// directory.
pub(crate) fn load_project(
    explicit: Option<&Path>,
) -> Result<(AssetflowConfig, PathBuf), ConfigError> {
    let cwd = std::env::current_dir().unwrap_or_default();

    let config_path = match explicit {
        Some(path) => Some(cwd.join(path)),
        None => find_config(),
    };

    match config_path {
        Some(path) => {
            tracing::debug!("Using config: {}", path.display());
            let config = load_config(Some(&path))?;
            let root = path.parent().map(Path::to_path_buf).unwrap_or(cwd);
            Ok((config, root))
        }
        None => {
            tracing::debug!("No {} found, using defaults", CONFIG_FILE_NAME);
            Ok((default_config(), cwd))
        }
    }
}

/// Run the build command
pub fn run_build(args: BuildArgs) -> ExitCode {
    let mode = resolve_mode();

    let (mut config, project_root) = match load_project(args.config.as_deref()) {
        Ok(project) => project,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            return ExitCode::from(EXIT_ERROR);
        }
    };

    let overrides = CliOverrides { port: args.port, no_cache: args.no_cache };
    merge_cli_overrides(&mut config, &overrides);

    let ctx = BuildContext::new(config, project_root, mode);
    let pipelines = match PipelineSet::from_context(&ctx) {
        Ok(pipelines) => pipelines,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(EXIT_ERROR);
        }
    };
    let graph = ExecutionGraph::for_mode(mode, &pipelines);

    if args.dry_run {
        println!("Dry run - would run:");
        print!("{}", graph);
        return ExitCode::from(EXIT_SUCCESS);
    }

    let cache = ctx.cache();
    if !cache.is_enabled() {
        tracing::info!("Transform cache disabled");
    }

    let hub = ReloadHub::new();
    let mut notifier = NotifierSet::new().with(LogNotifier);
    if !args.no_serve {
        notifier = notifier.with(hub.clone());
    }

    let server = DevServer::new(ctx.config().server.port, ctx.server_root(), hub);

    let watcher = if mode.is_development() && !args.no_watch {
        match WatchCoordinator::new(&ctx, &pipelines, &cache, &notifier) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                eprintln!("Error: {}", e);
                return ExitCode::from(EXIT_ERROR);
            }
        }
    } else {
        None
    };

    let mut scheduler = Scheduler::new(&pipelines, mode, &cache, ctx.dist_dir(), &notifier);
    if !args.no_serve {
        scheduler = scheduler.with_serve(&server);
    }
    if let Some(watcher) = &watcher {
        scheduler = scheduler.with_watch(watcher);
    }

    match scheduler.run(&graph) {
        Ok(report) => {
            println!("{}", report.summary());
            ExitCode::from(EXIT_SUCCESS)
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}

/// Run the clear command. Never fails.
pub fn run_clear(config: Option<&Path>) -> ExitCode {
    let (config, project_root) = match load_project(config) {
        Ok(project) => project,
        Err(e) => {
            tracing::warn!("{}; clearing the default cache location", e);
            (default_config(), std::env::current_dir().unwrap_or_default())
        }
    };

    let ctx = BuildContext::new(config, project_root, resolve_mode());
    let cache = ctx.cache();

    match cache.clear() {
        Ok(ClearOutcome::Cleared { entries }) => {
            println!("Cleared {} cache entries from {}", entries, cache.dir().display());
        }
        Ok(ClearOutcome::Empty) => println!("Cache is already empty"),
        Err(e) => tracing::warn!("Could not clear cache: {}", e),
    }
    ExitCode::from(EXIT_SUCCESS)
}

/// Error while initializing a project
#[derive(Debug, Error)]
pub(crate) enum InitError {
    /// Config exists and `--force` was not given
    #[error("{} already exists", .0.display())]
    ConfigExists(PathBuf),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("failed to write {}: {source}", .path.display())]
    Io { path: PathBuf, source: std::io::Error },
}

/// Write the default configuration into `project_path`, named after the directory.
pub(crate) fn init_project(project_path: &Path, force: bool) -> Result<PathBuf, InitError> {
    let config_path = project_path.join(CONFIG_FILE_NAME);
    if config_path.exists() && !force {
        return Err(InitError::ConfigExists(config_path));
    }

    std::fs::create_dir_all(project_path)
        .map_err(|source| InitError::Io { path: project_path.to_path_buf(), source })?;

    let mut config = default_config();
    let canonical = project_path.canonicalize().unwrap_or_else(|_| project_path.to_path_buf());
    if let Some(name) = canonical.file_name() {
        config.project.name = name.to_string_lossy().into_owned();
    }

    let contents = toml::to_string_pretty(&config)?;
    std::fs::write(&config_path, contents)
        .map_err(|source| InitError::Io { path: config_path.clone(), source })?;
    Ok(config_path)
}

/// Run the init command
pub fn run_init(path: &Path, force: bool) -> ExitCode {
    match init_project(path, force) {
        Ok(config_path) => {
            println!("Created {}", config_path.display());
            println!();
            println!("Next steps:");
            println!("  aflow build                          # develop with live reload");
            println!("  ASSETFLOW_ENV=production aflow build # write dist/");
            ExitCode::from(EXIT_SUCCESS)
        }
        Err(InitError::ConfigExists(path)) => {
            eprintln!("Error: {} already exists", path.display());
            eprintln!("Use --force to overwrite it");
            ExitCode::from(EXIT_ERROR)
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}
