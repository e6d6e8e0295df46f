#![cfg_attr(not(test), forbid(unsafe_code))]

//! Command line entry point for the OmniDesk server.

use std::path::PathBuf;

use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use shared::config::server::Config;

/// OmniDesk command line
#[derive(Debug, Parser)]
#[command(name = "omnidesk")]
#[command(about = "Multi-tenant customer service desk server", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start the HTTP and WebSocket server
    Serve {
        /// Port to bind, overriding the configuration file and environment.
        #[arg(long, short)]
        port: Option<u16>,

        /// Configuration file (`.yaml`, `.yml` or `.json`). Defaults apply when omitted.
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
}

async fn serve(port: Option<u16>, config: Option<PathBuf>) -> anyhow::Result<()> {
    let resolved = Config::load_config(config, port).context("failed to load configuration")?;
    server::server::run(resolved)
        .await
        .map_err(|err| anyhow!("server exited: {err}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    match Cli::parse().command {
        Commands::Serve { port, config } => serve(port, config).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn serve_accepts_port_and_config() {
        let cli = Cli::try_parse_from(["omnidesk", "serve", "--port", "9090", "-c", "omnidesk.yaml"])
            .unwrap();
        let Commands::Serve { port, config } = cli.command;
        assert_eq!(port, Some(9090));
        assert_eq!(config, Some(PathBuf::from("omnidesk.yaml")));
    }

    #[test]
    fn serve_without_flags_uses_defaults() {
        let cli = Cli::try_parse_from(["omnidesk", "serve"]).unwrap();
        let Commands::Serve { port, config } = cli.command;
        assert_eq!(port, None);
        assert_eq!(config, None);
    }
}
