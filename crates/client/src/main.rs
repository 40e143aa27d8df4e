//! WarpClip Remote Client
//!
//! Reads stdin and sends it through the SSH reverse tunnel to `warpclipd`.

use clap::{CommandFactory, Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use warpclip::{
    read_input, send_payload, tunnel_help, ClientError, ClientOptions, DEFAULT_TUNNEL_PORT,
    NO_INPUT_HELP,
};

const ABOUT_TUNNEL: &str = "\
WarpClip copies content from the remote server to your local clipboard via
a secure SSH tunnel. Make sure you connected with port forwarding enabled:
  ssh -R 9999:localhost:8888 user@host";

/// WarpClip Remote Client - copy stdin to your local clipboard.
#[derive(Parser, Debug)]
#[command(name = "warpclip")]
#[command(version = concat!("v", env!("CARGO_PKG_VERSION")), about, long_about = None)]
#[command(disable_help_subcommand = true, after_long_help = ABOUT_TUNNEL)]
#[command(override_usage = "cat file.txt | warpclip [OPTIONS]\n       warpclip [OPTIONS] < file.txt")]
pub struct Cli {
    /// Tunnel port on this machine
    #[arg(short, long, default_value_t = DEFAULT_TUNNEL_PORT)]
    pub port: u16,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Show this help message
    Help,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.command == Some(Commands::Help) {
        Cli::command().print_long_help()?;
        return Ok(());
    }

    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();

    eprintln!("Sending input to clipboard...");

    let options = ClientOptions::for_port(cli.port);
    let result = tokio::select! {
        result = run(&options) => result,
        _ = tokio::signal::ctrl_c() => {
            eprintln!();
            eprintln!("Operation canceled by user.");
            std::process::exit(1);
        }
    };

    match result {
        Ok(sent) => {
            tracing::debug!(bytes = sent, "payload delivered");
            eprintln!("Content copied to clipboard successfully!");
            Ok(())
        }
        Err(ClientError::NoInput) => {
            eprintln!("{}", NO_INPUT_HELP);
            std::process::exit(1);
        }
        Err(ClientError::TunnelNotDetected(port)) => {
            eprintln!("{}", tunnel_help(port));
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Failed to copy content to clipboard.");
            std::process::exit(1);
        }
    }
}

async fn run(options: &ClientOptions) -> Result<usize, ClientError> {
    let data = read_input(tokio::io::stdin()).await?;
    tracing::debug!("Read {} bytes from stdin", data.len());
    if !data.is_empty() {
        eprintln!("Sending {} bytes to clipboard...", data.len());
    }
    send_payload(&data, options).await
}
