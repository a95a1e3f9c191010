//! curator CLI: score, group and select the day's collected items.
//!
//! Reads a JSON file of collected items, filters out anything seen in
//! earlier runs, and prints a short ranked selection.

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
