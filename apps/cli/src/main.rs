//! Sanitize CLI: runs the text-sanitizing, phone-extracting pipeline stage.
//!
//! Claims tasks from the stage queue, writes partial entities and mentions
//! back to the entity store, and hands each task on to the next stage.

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
