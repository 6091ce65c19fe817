//! aflow - Command-line tool for building, watching and serving front-end assets

use std::process::ExitCode;

use assetflow::cli;

fn main() -> ExitCode {
    cli::run()
}
