//! botadura CLI — declarative container-service deployments.

use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "botadura",
    version,
    about = "Declarative container-service deployments — typed environments, planned stages, idempotent log-group binding"
)]
struct Cli {
    #[command(subcommand)]
    command: botadura::cli::Commands,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = botadura::cli::dispatch(cli.command).await {
        tracing::error!(error = %e, "definition pass failed");
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
