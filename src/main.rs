//! sockprobe: raw socket diagnostics
//!
//! Servers:
//! - TCP echo on a single-threaded readiness-polled event loop
//! - UDP echo with an idle report every few seconds
//! - Minimal HTTP responder, non-blocking or blocking
//!
//! Clients:
//! - Interactive TCP and UDP echo clients
//! - One-shot HTTP GET
//!
//! Configuration via CLI arguments or TOML file.

mod client;
mod config;
mod content;
mod error;
mod protocols;
mod runtime;

use config::{Config, Mode};
use runtime::Shutdown;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        mode = ?config.mode,
        address = %config.address,
        buffer_size = config.buffer_size,
        "Starting sockprobe"
    );

    match config.mode {
        Mode::TcpClient | Mode::UdpClient | Mode::HttpClient => run_client(config),
        _ => run_server(config),
    }
}

/// Run a server until Ctrl-C
fn run_server(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let shutdown = Shutdown::new();
    shutdown.install_ctrlc()?;
    runtime::run(&config, &shutdown)
}

/// Run a client until stdin closes
fn run_client(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    client::run(&config)?;
    Ok(())
}
