//! Socket runtime.
//!
//! Readiness-based I/O using mio (epoll on Linux, kqueue on macOS):
//! - `EventLoop`: single-threaded TCP multiplexer driving a `ProtocolHandler`
//! - `UdpEchoServer`: stateless datagram echo
//! - `serve_blocking`: one-connection-at-a-time HTTP responder
//!
//! Shared pieces:
//! - `binding`: listener and datagram endpoint acquisition
//! - `ReadinessPoller`: the only suspension point of a loop
//! - `ConnectionRegistry`: owner of every accepted connection
//! - `Shutdown`: cooperative cancellation

pub mod binding;
mod blocking;
pub mod connection;
mod datagram;
mod event_loop;
mod poller;
pub mod protocol;
mod shutdown;

pub use blocking::serve_blocking;
pub use connection::{ConnState, Connection, ConnectionRegistry};
pub use datagram::UdpEchoServer;
pub use event_loop::{EventLoop, LoopSettings};
pub use poller::ReadinessPoller;
pub use protocol::{Disposition, Protocol, ProtocolHandler};
pub use shutdown::Shutdown;

use crate::config::{Config, Mode};
use crate::content::provider_for;
use crate::protocols::echo::EchoHandler;
use crate::protocols::http::MinimalHttpHandler;
use std::error::Error;

/// Run the server selected by `config.mode` until `shutdown` fires.
pub fn run(config: &Config, shutdown: &Shutdown) -> Result<(), Box<dyn Error>> {
    match config.mode {
        Mode::TcpEcho => {
            let handler = EchoHandler::new(config.buffer_size);
            EventLoop::bind(&config.address, handler, config.into(), shutdown)?.run()?;
        }
        Mode::Http => {
            let handler =
                MinimalHttpHandler::new(provider_for(config.content.clone()), config.buffer_size);
            EventLoop::bind(&config.address, handler, config.into(), shutdown)?.run()?;
        }
        Mode::HttpBlocking => {
            let listener = binding::open_blocking_listener(&config.address, config.accept_timeout)?;
            let handler =
                MinimalHttpHandler::new(provider_for(config.content.clone()), config.buffer_size);
            serve_blocking(listener, handler, shutdown)?;
        }
        Mode::UdpEcho => {
            UdpEchoServer::bind(&config.address)?.run(config.udp_timeout, shutdown)?;
        }
        Mode::TcpClient | Mode::UdpClient | Mode::HttpClient => {
            return Err(format!("{:?} is a client mode", config.mode).into());
        }
    }
    Ok(())
}
