use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use drive_reconcile::cli;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = cli::Cli::parse();
    cli::run(cli).await
}
