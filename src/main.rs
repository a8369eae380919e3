use std::process::ExitCode;

use clap::Parser;
use tracing::error;

use fpga_bridge::cli::Cli;
use fpga_bridge::config::Config;
use fpga_bridge::error::StartupError;
use fpga_bridge::{logging, runtime};

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.log_filter.as_deref());

    match start(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "fatal startup error");
            ExitCode::from(err.exit_code() as u8)
        }
    }
}

fn start(cli: Cli) -> Result<(), StartupError> {
    let config = Config::from_file(&cli.config)?;

    let tokio_runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to build the tokio runtime");
    let local = tokio::task::LocalSet::new();

    local.block_on(&tokio_runtime, runtime::run(config))
}
