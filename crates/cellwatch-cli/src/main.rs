mod bootstrap_helpers;
mod cli_args;
mod commands;

use anyhow::Result;
use clap::Parser;

use crate::{bootstrap_helpers::init_tracing, cli_args::Cli, commands::run_cli};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    run_cli(Cli::parse()).await
}
