//! Static execution graphs for development and production builds.

use crate::build::{Pipeline, PipelineSet};
use crate::config::Stage;
use crate::mode::BuildMode;
use std::collections::HashSet;
use std::fmt;

/// A node of an execution graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    /// Run children one after another
    Sequence(Vec<Task>),
    /// Run children concurrently and wait for all of them
    Parallel(Vec<Task>),
    /// Invoke a pipeline by name
    Pipeline(String),
    /// Remove and recreate the distribution root
    Clean,
    /// Run the preview server
    Serve,
    /// Run the watch coordinator
    Watch,
}

impl Task {
    /// Pipeline names referenced anywhere below this task, in graph order.
    pub fn pipelines(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_pipelines(&mut names);
        names
    }

    fn collect_pipelines<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            Task::Sequence(children) | Task::Parallel(children) => {
                for child in children {
                    child.collect_pipelines(names);
                }
            }
            Task::Pipeline(name) => names.push(name),
            Task::Clean | Task::Serve | Task::Watch => {}
        }
    }

    fn write_tree(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let indent = "  ".repeat(depth);
        match self {
            Task::Sequence(children) | Task::Parallel(children) => {
                let label = if matches!(self, Task::Sequence(_)) { "sequence" } else { "parallel" };
                writeln!(f, "{}{}", indent, label)?;
                for child in children {
                    child.write_tree(f, depth + 1)?;
                }
                Ok(())
            }
            Task::Pipeline(name) => writeln!(f, "{}pipeline {}", indent, name),
            Task::Clean => writeln!(f, "{}clean", indent),
            Task::Serve => writeln!(f, "{}serve", indent),
            Task::Watch => writeln!(f, "{}watch", indent),
        }
    }
}

/// The task tree for one build mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionGraph {
    mode: BuildMode,
    root: Task,
}

impl ExecutionGraph {
    /// Build-stage pipelines, then serve and watch in parallel.
    ///
    /// Pipelines of a stage run in parallel except where `after` orders them.
    pub fn development(pipelines: &PipelineSet) -> Self {
        let build = stage_group(pipelines, Stage::Build);
        Self {
            mode: BuildMode::Development,
            root: Task::Sequence(vec![build, Task::Parallel(vec![Task::Serve, Task::Watch])]),
        }
    }

    /// Clean, then build-stage pipelines, then asset-stage pipelines.
    pub fn production(pipelines: &PipelineSet) -> Self {
        let build = stage_group(pipelines, Stage::Build);
        let assets = stage_group(pipelines, Stage::Assets);
        Self { mode: BuildMode::Production, root: Task::Sequence(vec![Task::Clean, build, assets]) }
    }

    pub fn for_mode(mode: BuildMode, pipelines: &PipelineSet) -> Self {
        match mode {
            BuildMode::Development => Self::development(pipelines),
            BuildMode::Production => Self::production(pipelines),
        }
    }

    pub fn mode(&self) -> BuildMode {
        self.mode
    }

    pub fn root(&self) -> &Task {
        &self.root
    }
}

impl fmt::Display for ExecutionGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} graph:", self.mode)?;
        self.root.write_tree(f, 1)
    }
}

/// Pipelines of `stage` grouped into waves by their `after` ordering.
///
/// Each wave runs in parallel once every earlier wave has finished. Names
/// outside the stage are ignored, and anything left unordered (a cycle in an
/// unvalidated set) runs last.
fn stage_group(pipelines: &PipelineSet, stage: Stage) -> Task {
    let mut pending: Vec<&Pipeline> = pipelines.iter().filter(|p| p.stage() == stage).collect();
    let in_stage: HashSet<&str> = pending.iter().copied().map(Pipeline::name).collect();
    let mut done: HashSet<&str> = HashSet::new();
    let mut waves: Vec<Vec<&str>> = Vec::new();

    while !pending.is_empty() {
        let (ready, blocked): (Vec<&Pipeline>, Vec<&Pipeline>) =
            pending.into_iter().partition(|p| {
                p.after()
                    .iter()
                    .all(|dep| done.contains(dep.as_str()) || !in_stage.contains(dep.as_str()))
            });
        if ready.is_empty() {
            waves.push(blocked.iter().copied().map(Pipeline::name).collect());
            break;
        }
        waves.push(ready.iter().copied().map(Pipeline::name).collect());
        done.extend(ready.iter().copied().map(Pipeline::name));
        pending = blocked;
    }

    let mut groups: Vec<Task> = waves
        .into_iter()
        .map(|wave| {
            Task::Parallel(wave.into_iter().map(|n| Task::Pipeline(n.to_string())).collect())
        })
        .collect();
    match groups.len() {
        0 => Task::Parallel(vec![]),
        1 => groups.remove(0),
        _ => Task::Sequence(groups),
    }
}
