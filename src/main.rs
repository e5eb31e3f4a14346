use clap::{ArgAction, Parser};
use std::error::Error;
use std::net::SocketAddr;
use std::path::PathBuf;

use braid::bus::{self, Config};

#[derive(Parser)]
#[command(name = "braid")]
#[command(about = "Secure multi-party bus over pre-shared-key encrypted frames", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Path to a file holding the hex-encoded 32-byte pre-shared key
    #[arg(long)]
    psk_file: PathBuf,

    /// Bind and listen for peers on this address
    #[arg(long)]
    server_addr: Option<SocketAddr>,

    /// Dial a peer's server at this address (repeatable)
    #[arg(long = "remote-server-addr")]
    remote_server_addrs: Vec<SocketAddr>,

    /// Deliver received frames to stdout (default)
    #[arg(long, action = ArgAction::SetTrue, overrides_with = "no_wait_input")]
    wait_input: bool,

    /// Transmit-only: do not start the receive/relay side
    #[arg(long, action = ArgAction::SetTrue, overrides_with = "wait_input")]
    no_wait_input: bool,

    /// After a chunk ending in this byte, yield the speaker floor
    #[arg(long)]
    sentinel_byte: Option<u8>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let cli = Cli::parse();

    // Configure logging based on verbose flag
    if cli.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
        log::info!("Verbose logging enabled");
    } else {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Info)
            .init();
    }

    let config = Config {
        server_addr: cli.server_addr,
        remote_server_addrs: cli.remote_server_addrs,
        psk_file: cli.psk_file,
        wait_input: cli.wait_input || !cli.no_wait_input,
        sentinel_byte: cli.sentinel_byte,
    };

    bus::run(config).await?;
    Ok(())
}
