//! assetflow - Incremental asset pipelines for static front-end projects
//!
//! This library provides functionality to:
//! - Describe named transform pipelines in `assetflow.toml`
//! - Run them through a development or production execution graph
//! - Re-run bound pipelines when sources change
//! - Serve the preview tree and push reload events to browsers

pub mod build;
pub mod cache;
pub mod cli;
pub mod config;
pub mod events;
pub mod mode;
pub mod server;
pub mod transform;
pub mod watch;
