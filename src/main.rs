use std::process::ExitCode;

use clap::Parser;
use ncml_datacube::{CliArgs, LoggingConfig, init_logging, run};

fn main() -> anyhow::Result<ExitCode> {
    let logging_config = LoggingConfig::from_env();
    let _guard = init_logging(logging_config)?;

    let cli = CliArgs::parse();
    run(cli)
}
