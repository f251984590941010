#![cfg_attr(not(test), forbid(unsafe_code))]

//! Command line entry point for the blog chat server.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use shared::config::server::Config;

/// Blog chat server CLI.
#[derive(Debug, Parser)]
#[command(name = "blogchat-server")]
#[command(about = "Live chat and moderation backend for the blog", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start the HTTP and WebSocket server
    Serve {
        /// The port number to bind the server to (e.g., 8080)
        #[arg(long, short)]
        port: u16,

        /// Path to a YAML or JSON configuration file. Defaults apply when omitted.
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
}

/// Loads configuration and runs the server until shutdown.
///
/// # Errors
/// Returns an error if configuration loading or server startup fails.
async fn handle_serve_command(port: u16, config: Option<PathBuf>) -> anyhow::Result<()> {
    let resolved = Config::load_config(config, Some(port)).context("failed to load configuration")?;
    server::server::run(resolved).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port, config } => handle_serve_command(port, config).await,
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
    fn serve_parses_port_and_config() {
        let cli = Cli::try_parse_from([
            "blogchat-server",
            "serve",
            "--port",
            "9090",
            "--config",
            "config.yaml",
        ])
        .unwrap();
        let Commands::Serve { port, config } = cli.command;
        assert_eq!(port, 9090);
        assert_eq!(config, Some(PathBuf::from("config.yaml")));
    }

    #[test]
    fn serve_requires_a_port() {
        assert!(Cli::try_parse_from(["blogchat-server", "serve"]).is_err());
    }
}
