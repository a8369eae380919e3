//! Command-line arguments, parsed with `clap`'s derive API.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "fpga-bridged", about = "FPGA/FTDI USB bridge daemon")]
pub struct Cli {
    /// Path to the JSON configuration file.
    #[arg(long, default_value = "config.json")]
    pub config: PathBuf,

    /// Overrides the `tracing_subscriber::EnvFilter` directive; falls
    /// back to `RUST_LOG`, then `info`.
    #[arg(long)]
    pub log_filter: Option<String>,
}
