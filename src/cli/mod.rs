//! Command-line interface implementation
//!
//! This module provides the CLI entry point and dispatches to submodules
//! for specific command implementations.

mod build;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Process exit codes
pub(crate) const EXIT_SUCCESS: u8 = 0;
pub(crate) const EXIT_ERROR: u8 = 1;
pub(crate) const EXIT_INVALID_ARGS: u8 = 2;

/// assetflow - Incremental asset pipelines for static front-end projects
#[derive(Parser)]
#[command(name = "aflow")]
#[command(about = "assetflow - Build, watch and serve front-end assets")]
#[command(version)]
pub struct Cli {
    /// Show debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the build graph for the current mode (set ASSETFLOW_ENV=production for dist builds)
    Build {
        /// Config file (default: nearest assetflow.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Preview server port
        #[arg(short, long)]
        port: Option<u16>,

        /// Do not start the preview server
        #[arg(long)]
        no_serve: bool,

        /// Do not watch for changes
        #[arg(long)]
        no_watch: bool,

        /// Bypass the transform cache
        #[arg(long)]
        no_cache: bool,

        /// Print the execution graph without running it
        #[arg(long)]
        dry_run: bool,
    },

    /// Invalidate the transform cache
    Clear {
        /// Config file (default: nearest assetflow.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Write a default assetflow.toml
    Init {
        /// Project directory
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },
}

/// Filter used when `RUST_LOG` is unset.
fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "assetflow=debug,info"
    } else {
        "info"
    }
}

/// Install the tracing subscriber. `RUST_LOG` wins over `--verbose`.
fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbose)));

    // Already installed when embedded in another process
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_target(false).compact().try_init();
}

/// Run the CLI application
pub fn run() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if e.use_stderr() => {
            let _ = e.print();
            return ExitCode::from(EXIT_INVALID_ARGS);
        }
        Err(e) => {
            // --help and --version
            let _ = e.print();
            return ExitCode::from(EXIT_SUCCESS);
        }
    };

    init_logging(cli.verbose);

    match cli.command {
        Commands::Build { config, port, no_serve, no_watch, no_cache, dry_run } => {
            build::run_build(build::BuildArgs {
                config,
                port,
                no_serve,
                no_watch,
                no_cache,
                dry_run,
            })
        }
        Commands::Clear { config } => build::run_clear(config.as_deref()),
        Commands::Init { path, force } => build::run_init(&path, force),
    }
}
