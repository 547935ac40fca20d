//! # flowfile-cli
//!
//! Command-line interface for building and running flowfile graphs.

use clap::Parser;
use flowfile_cli::{dispatch, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    dispatch(cli).await
}
