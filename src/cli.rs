use clap::{Parser, Subcommand};
use std::net::SocketAddr;

#[derive(Parser, Debug)]
#[command(name = "faxbot")]
#[command(about = "Faxbot fax gateway", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the Faxbot API service
    Api(ApiArgs),

    /// Run one retention sweep and exit
    Sweep,
}

#[derive(clap::Args, Debug)]
pub struct ApiArgs {
    /// Address to bind the API server to
    #[arg(long, default_value = "0.0.0.0:8080")]
    pub address: SocketAddr,
}
