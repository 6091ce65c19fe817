//! Build orchestration for assetflow
//!
//! Turns configuration into pipelines and runs them through the execution
//! graph of the active build mode.
//!
//! # Overview
//!
//! - **Discovery**: find source files for each pipeline's glob list
//! - **Pipelines**: run transform chains in memory, then write dest/dist trees
//! - **Graphs**: the static development and production task trees
//! - **Scheduling**: run graphs with sequential and parallel group semantics
//!
//! # Example
//!
//! ```ignore
//! use assetflow::build::{BuildContext, ExecutionGraph, PipelineSet, Scheduler};
//! use assetflow::events::LogNotifier;
//!
//! let ctx = BuildContext::new(config, project_root, mode);
//! let pipelines = PipelineSet::from_context(&ctx)?;
//! let cache = ctx.cache();
//! let scheduler = Scheduler::new(&pipelines, ctx.mode(), &cache, ctx.dist_dir(), &LogNotifier);
//!
//! let report = scheduler.run(&ExecutionGraph::for_mode(ctx.mode(), &pipelines))?;
//! println!("{}", report.summary());
//! ```

pub mod context;
pub mod discovery;
pub mod graph;
pub mod pipeline;
pub mod result;
pub mod scheduler;

pub use context::*;
pub use discovery::*;
pub use graph::*;
pub use pipeline::*;
pub use result::*;
pub use scheduler::*;
