//! Docforge CLI: build documentation bundles from a YAML manifest.
//!
//! Documents are pulled from GitHub or local checkouts, their links are
//! rewritten and validated, and linked resources are downloaded next to them.

mod commands;

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
