use std::process::ExitCode;

use clap::Parser;

use maskstudio::cli::CliArgs;
use maskstudio::{log_info, logger};

fn main() -> ExitCode {
    logger::init();
    log_info!("maskstudio v{} starting", env!("CARGO_PKG_VERSION"));
    let args = CliArgs::parse();
    maskstudio::cli::run(args)
}
