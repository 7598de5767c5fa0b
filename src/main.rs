use clap::Parser;
use tracing_subscriber::EnvFilter;

use ferrite_fit::cli::{self, Cli, RunConfig};

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> anyhow::Result<()> {
    init_logging();
    let config = RunConfig::from(Cli::parse());
    cli::run(&config)?;
    Ok(())
}
