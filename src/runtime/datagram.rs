//! UDP echo server.
//!
//! Stateless: every datagram is a complete transaction, answered to the
//! address it arrived from. Nothing is tracked between datagrams.

use crate::error::NetError;
use crate::runtime::binding::bind_datagram;
use crate::runtime::{ReadinessPoller, Shutdown};
use mio::net::UdpSocket;
use mio::{Interest, Token, Waker};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{info, warn};

const SOCKET_TOKEN: Token = Token(0);
const WAKER_TOKEN: Token = Token(1);

/// Receive buffer size; no UDP payload is larger.
const MAX_DATAGRAM: usize = 64 * 1024;

/// Result of one wait for a datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatagramOutcome {
    /// A datagram of `len` bytes from `peer` was sent back.
    Echoed { peer: SocketAddr, len: usize },
    /// Nothing arrived before the timeout.
    NoData,
}

pub struct UdpEchoServer {
    socket: UdpSocket,
    local_addr: SocketAddr,
    poller: ReadinessPoller,
    buf: Vec<u8>,
}

impl UdpEchoServer {
    /// Bind `addr`. Datagrams are echoed whole, whatever their size.
    pub fn bind(addr: &str) -> Result<Self, NetError> {
        let mut socket = bind_datagram(addr)?;
        let local_addr = socket.local_addr()?;
        let poller = ReadinessPoller::new(16)?;
        poller
            .registry()
            .register(&mut socket, SOCKET_TOKEN, Interest::READABLE)?;

        Ok(Self {
            socket,
            local_addr,
            poller,
            buf: vec![0; MAX_DATAGRAM],
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait up to `timeout` for one datagram and echo it.
    pub fn poll_once(&mut self, timeout: Option<Duration>) -> Result<DatagramOutcome, NetError> {
        let ready = self.poller.poll(timeout)?;
        if ready.is_empty() {
            info!("No data received");
            return Ok(DatagramOutcome::NoData);
        }
        if !ready.contains(SOCKET_TOKEN) {
            return Ok(DatagramOutcome::NoData);
        }

        let (n, peer) = match self.socket.recv_from(&mut self.buf) {
            Ok(received) => received,
            Err(e) => {
                return match NetError::from(e) {
                    NetError::WouldBlock => Ok(DatagramOutcome::NoData),
                    other => Err(other),
                };
            }
        };
        // Another datagram may already be queued.
        self.poller.rearm(SOCKET_TOKEN);

        let data = &self.buf[..n];
        info!(
            peer = %peer,
            bytes = n,
            payload = %String::from_utf8_lossy(data),
            "Echo"
        );
        self.socket.send_to(data, peer)?;

        Ok(DatagramOutcome::Echoed { peer, len: n })
    }

    /// Serve until shutdown, reporting idle every `timeout`.
    pub fn run(mut self, timeout: Duration, shutdown: &Shutdown) -> io::Result<()> {
        let waker_key = shutdown.attach(Waker::new(self.poller.registry(), WAKER_TOKEN)?);
        info!(addr = %self.local_addr, "===== Listening =====");

        while !shutdown.is_triggered() {
            if let Err(e) = self.poll_once(Some(timeout)) {
                warn!(error = %e, "Datagram dropped");
            }
        }

        shutdown.detach(waker_key);
        let _ = self.poller.registry().deregister(&mut self.socket);
        info!(addr = %self.local_addr, "Shut down");
        Ok(())
    }
}
