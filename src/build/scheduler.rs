//! Execution graph runner.
//!
//! Sequence groups run their stages one after another; parallel groups start
//! every member on a scoped thread and complete once all members have. A
//! failed pipeline is recorded and its siblings keep going. Only a failed
//! clean (or a graph naming an unknown pipeline) stops the graph.

use crate::build::graph::{ExecutionGraph, Task};
use crate::build::{BuildReport, PipelineSet};
use crate::cache::TransformCache;
use crate::events::Notifier;
use crate::mode::BuildMode;
use std::fs;
use std::path::PathBuf;
use std::time::Instant;
use thiserror::Error;

/// Error a long-running service ends with.
pub type ServiceError = Box<dyn std::error::Error + Send + Sync>;

/// A long-running leaf of the development graph (preview server, watcher).
///
/// `run` blocks for the lifetime of the service.
pub trait Service: Send + Sync {
    fn name(&self) -> &str;
    fn run(&self) -> Result<(), ServiceError>;
}

/// Fatal graph error.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The distribution root could not be reset
    #[error("failed to clean {}: {source}", .path.display())]
    Clean {
        /// Distribution root
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },
    /// The graph references a pipeline that does not exist
    #[error("execution graph references unknown pipeline '{0}'")]
    UnknownPipeline(String),
    /// A task thread panicked
    #[error("task panicked: {0}")]
    Panicked(String),
}

/// Runs execution graphs against a pipeline set.
pub struct Scheduler<'a> {
    pipelines: &'a PipelineSet,
    mode: BuildMode,
    cache: &'a TransformCache,
    dist_root: PathBuf,
    notifier: &'a dyn Notifier,
    serve: Option<&'a dyn Service>,
    watch: Option<&'a dyn Service>,
}

impl<'a> Scheduler<'a> {
    /// Create a scheduler without serve/watch services.
    pub fn new(
        pipelines: &'a PipelineSet,
        mode: BuildMode,
        cache: &'a TransformCache,
        dist_root: PathBuf,
        notifier: &'a dyn Notifier,
    ) -> Self {
        Self { pipelines, mode, cache, dist_root, notifier, serve: None, watch: None }
    }

    /// Attach the service run by `Serve` leaves.
    pub fn with_serve(mut self, service: &'a dyn Service) -> Self {
        self.serve = Some(service);
        self
    }

    /// Attach the service run by `Watch` leaves.
    pub fn with_watch(mut self, service: &'a dyn Service) -> Self {
        self.watch = Some(service);
        self
    }

    /// Run `graph` to completion.
    pub fn run(&self, graph: &ExecutionGraph) -> Result<BuildReport, SchedulerError> {
        let start = Instant::now();

        for name in graph.root().pipelines() {
            if self.pipelines.get(name).is_none() {
                return Err(SchedulerError::UnknownPipeline(name.to_string()));
            }
        }

        tracing::info!("Starting {} build", self.mode);
        let report = self.execute(graph.root())?;
        Ok(report.with_duration(start.elapsed()))
    }

    fn execute(&self, task: &Task) -> Result<BuildReport, SchedulerError> {
        match task {
            Task::Sequence(stages) => {
                let mut report = BuildReport::new();
                for stage in stages {
                    report.merge(self.execute(stage)?);
                }
                Ok(report)
            }
            Task::Parallel(members) => self.execute_parallel(members),
            Task::Pipeline(name) => {
                let pipeline = self
                    .pipelines
                    .get(name)
                    .ok_or_else(|| SchedulerError::UnknownPipeline(name.clone()))?;
                let mut report = BuildReport::new();
                report.add_result(pipeline.invoke(self.mode, self.cache, self.notifier));
                Ok(report)
            }
            Task::Clean => {
                self.clean()?;
                Ok(BuildReport::new())
            }
            Task::Serve => {
                self.run_service("serve", self.serve);
                Ok(BuildReport::new())
            }
            Task::Watch => {
                self.run_service("watch", self.watch);
                Ok(BuildReport::new())
            }
        }
    }

    fn execute_parallel(&self, members: &[Task]) -> Result<BuildReport, SchedulerError> {
        if members.len() <= 1 {
            return match members.first() {
                Some(task) => self.execute(task),
                None => Ok(BuildReport::new()),
            };
        }

        let outcomes: Vec<Result<BuildReport, SchedulerError>> = std::thread::scope(|s| {
            let handles: Vec<_> =
                members.iter().map(|task| s.spawn(move || self.execute(task))).collect();

            handles
                .into_iter()
                .map(|handle| {
                    handle.join().unwrap_or_else(|panic| {
                        let message = panic
                            .downcast_ref::<&str>()
                            .map(|s| s.to_string())
                            .or_else(|| panic.downcast_ref::<String>().cloned())
                            .unwrap_or_else(|| "unknown panic".to_string());
                        Err(SchedulerError::Panicked(message))
                    })
                })
                .collect()
        });

        let mut report = BuildReport::new();
        let mut first_error = None;
        for outcome in outcomes {
            match outcome {
                Ok(member) => report.merge(member),
                Err(e) if first_error.is_none() => first_error = Some(e),
                Err(e) => tracing::error!("{}", e),
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    /// Remove and recreate the distribution root.
    fn clean(&self) -> Result<(), SchedulerError> {
        let err = |source| SchedulerError::Clean { path: self.dist_root.clone(), source };
        if self.dist_root.exists() {
            tracing::info!("Cleaning {}", self.dist_root.display());
            fs::remove_dir_all(&self.dist_root).map_err(err)?;
        }
        fs::create_dir_all(&self.dist_root).map_err(err)
    }

    fn run_service(&self, leaf: &str, service: Option<&dyn Service>) {
        match service {
            Some(service) => {
                tracing::debug!("Starting {}", service.name());
                if let Err(e) = service.run() {
                    tracing::error!("{} stopped: {}", service.name(), e);
                }
            }
            None => tracing::info!("No {} service attached, skipping", leaf),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{BuildContext, Pipeline};
    use crate::config::{default_config, PipelineConfig, Stage};
    use crate::events::{BuildEvent, ChannelNotifier};
    use crate::transform::{CommandStep, PipelineStep, TransformStep};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc::channel;
    use tempfile::TempDir;

    fn copy_pipeline(name: &str, stage: Stage) -> PipelineConfig {
        PipelineConfig {
            name: name.to_string(),
            sources: vec![format!("src/{}/*", name)],
            exclude: vec![],
            dest: None,
            dist: Some(PathBuf::from(name)),
            stage,
            after: vec![],
            source_maps: false,
            required: false,
            steps: vec![],
        }
    }

    fn pipeline_set(root: &Path, configs: Vec<PipelineConfig>) -> PipelineSet {
        let mut config = default_config();
        config.pipelines = configs;
        let ctx = BuildContext::new(config, root.to_path_buf(), BuildMode::Production);
        PipelineSet::from_pipelines(
            ctx.config().pipelines.iter().map(|p| Pipeline::from_config(p, &ctx)).collect(),
        )
    }

    fn write(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, rel).unwrap();
    }

    struct CountingService {
        runs: AtomicUsize,
    }

    impl Service for CountingService {
        fn name(&self) -> &str {
            "counting"
        }

        fn run(&self) -> Result<(), ServiceError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Err("stopped".into())
        }
    }

    #[test]
    fn test_production_run_cleans_and_builds() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "src/fonts/a.woff");
        write(temp.path(), "src/img/b.svg");
        write(temp.path(), "dist/stale.txt");

        let set = pipeline_set(
            temp.path(),
            vec![copy_pipeline("fonts", Stage::Assets), copy_pipeline("img", Stage::Assets)],
        );
        let cache = TransformCache::disabled();
        let (tx, rx) = channel();
        let notifier = ChannelNotifier::new(tx);
        let scheduler = Scheduler::new(
            &set,
            BuildMode::Production,
            &cache,
            temp.path().join("dist"),
            &notifier,
        );

        let report = scheduler.run(&ExecutionGraph::production(&set)).unwrap();
        assert!(report.is_success());
        assert!(!temp.path().join("dist/stale.txt").exists());
        assert!(temp.path().join("dist/fonts/a.woff").exists());
        assert!(temp.path().join("dist/img/b.svg").exists());
        assert_eq!(rx.try_iter().filter(BuildEvent::is_completed).count(), 2);
    }

    #[test]
    fn test_failure_does_not_stop_siblings() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "src/fonts/a.woff");
        write(temp.path(), "src/img/b.svg");

        let mut broken = copy_pipeline("img", Stage::Build);
        broken.steps = vec![PipelineStep::always(TransformStep::Command(CommandStep::new(
            "assetflow-missing-tool",
        )))];
        let set = pipeline_set(temp.path(), vec![copy_pipeline("fonts", Stage::Build), broken]);
        let cache = TransformCache::disabled();
        let (tx, _rx) = channel();
        let notifier = ChannelNotifier::new(tx);
        let scheduler =
            Scheduler::new(&set, BuildMode::Production, &cache, temp.path().join("dist"), &notifier);

        let report = scheduler.run(&ExecutionGraph::production(&set)).unwrap();
        assert_eq!(report.failed_count(), 1);
        assert!(report.result("fonts").unwrap().is_success());
        assert!(temp.path().join("dist/fonts/a.woff").exists());
        assert!(!temp.path().join("dist/img").exists());
    }

    #[test]
    fn test_unknown_pipeline_is_fatal() {
        let temp = TempDir::new().unwrap();
        let set = pipeline_set(temp.path(), vec![]);
        let cache = TransformCache::disabled();
        let (tx, _rx) = channel();
        let notifier = ChannelNotifier::new(tx);
        let scheduler =
            Scheduler::new(&set, BuildMode::Development, &cache, temp.path().join("dist"), &notifier);
        let graph = ExecutionGraph::development(&pipeline_set(
            temp.path(),
            vec![copy_pipeline("ghost", Stage::Build)],
        ));

        let err = scheduler.run(&graph).unwrap_err();
        assert!(matches!(err, SchedulerError::UnknownPipeline(ref name) if name == "ghost"));
    }

    #[test]
    fn test_clean_failure_is_fatal() {
        let temp = TempDir::new().unwrap();
        // A regular file where a directory is needed
        write(temp.path(), "blocker");
        let set = pipeline_set(temp.path(), vec![]);
        let cache = TransformCache::disabled();
        let (tx, _rx) = channel();
        let notifier = ChannelNotifier::new(tx);
        let scheduler = Scheduler::new(
            &set,
            BuildMode::Production,
            &cache,
            temp.path().join("blocker/dist"),
            &notifier,
        );

        let err = scheduler.run(&ExecutionGraph::production(&set)).unwrap_err();
        assert!(matches!(err, SchedulerError::Clean { .. }));
    }

    #[test]
    fn test_services_run_in_development() {
        let temp = TempDir::new().unwrap();
        let set = pipeline_set(temp.path(), vec![]);
        let cache = TransformCache::disabled();
        let (tx, _rx) = channel();
        let notifier = ChannelNotifier::new(tx);
        let serve = CountingService { runs: AtomicUsize::new(0) };
        let watch = CountingService { runs: AtomicUsize::new(0) };
        let scheduler =
            Scheduler::new(&set, BuildMode::Development, &cache, temp.path().join("dist"), &notifier)
                .with_serve(&serve)
                .with_watch(&watch);

        scheduler.run(&ExecutionGraph::development(&set)).unwrap();
        assert_eq!(serve.runs.load(Ordering::SeqCst), 1);
        assert_eq!(watch.runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_missing_services_are_skipped() {
        let temp = TempDir::new().unwrap();
        let set = pipeline_set(temp.path(), vec![]);
        let cache = TransformCache::disabled();
        let (tx, _rx) = channel();
        let notifier = ChannelNotifier::new(tx);
        let scheduler =
            Scheduler::new(&set, BuildMode::Development, &cache, temp.path().join("dist"), &notifier);

        let report = scheduler.run(&ExecutionGraph::development(&set)).unwrap();
        assert!(report.pipelines.is_empty());
    }
}
