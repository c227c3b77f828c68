mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use faxbot::api;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Api(args) => api::run(args.address).await?,
        Commands::Sweep => api::sweep_once().await?,
    }

    Ok(())
}
