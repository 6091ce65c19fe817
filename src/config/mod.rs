//! Configuration module for assetflow
//!
//! Provides types, discovery and loading for `assetflow.toml` project configuration.

pub mod loader;
pub mod schema;

pub use loader::*;
pub use schema::*;
