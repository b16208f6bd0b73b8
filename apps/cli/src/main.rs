//! hss: incremental static builds for IIIF Manifests and Collections.
//!
//! Reads `hss.toml`, runs the phased build, and prints a per-phase summary.

mod commands;
mod progress;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
