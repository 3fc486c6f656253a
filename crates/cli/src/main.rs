//! Command-line summarizer.

use anyhow::Result;
use clap::Parser;
use condense_summarizer::cli::{run_cli, Cli};

fn main() -> Result<()> {
    let cli = Cli::parse();
    run_cli(cli)
}
