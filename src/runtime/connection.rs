//! Accepted TCP connections and the registry that owns them.
//!
//! Each connection tracks its peer, the protocol serving it, and any response
//! bytes not yet accepted by the kernel. The registry is the sole owner of
//! every accepted stream; dropping a `Connection` closes its socket.

use crate::error::NetError;
use crate::runtime::protocol::Protocol;
use bytes::{Buf, BytesMut};
use mio::net::TcpStream;
use mio::{Interest, Registry, Token};
use slab::Slab;
use std::io::{self, Read, Write};
use std::net::SocketAddr;

/// Current state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Serviced on every readable pass.
    Open,
    /// Closing once the outbound buffer has been flushed; no more reads.
    Draining,
}

/// A single client connection.
#[derive(Debug)]
pub struct Connection {
    id: usize,
    stream: TcpStream,
    peer: SocketAddr,
    protocol: Protocol,
    state: ConnState,
    outbound: BytesMut,
    interest: Interest,
}

impl Connection {
    /// Wrap an accepted stream. The registry assigns the id on insert.
    pub fn new(stream: TcpStream, peer: SocketAddr, protocol: Protocol) -> Self {
        Self {
            id: usize::MAX,
            stream,
            peer,
            protocol,
            state: ConnState::Open,
            outbound: BytesMut::new(),
            interest: Interest::READABLE,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn token(&self) -> Token {
        Token(self.id)
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Stop reading; close after the pending response is sent.
    pub fn begin_draining(&mut self) {
        self.state = ConnState::Draining;
    }

    /// Perform one read.
    ///
    /// Zero bytes maps to `PeerClosed`, an empty socket to `WouldBlock`.
    pub fn read_once(&mut self, buf: &mut [u8]) -> Result<usize, NetError> {
        loop {
            match self.stream.read(buf) {
                Ok(0) => return Err(NetError::PeerClosed),
                Ok(n) => return Ok(n),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Append bytes to be sent on the next flush.
    pub fn queue(&mut self, data: &[u8]) {
        self.outbound.extend_from_slice(data);
    }

    /// Bytes queued but not yet written.
    pub fn pending(&self) -> usize {
        self.outbound.len()
    }

    /// Write queued bytes until done or the socket would block.
    ///
    /// Returns `true` once the outbound buffer is empty.
    pub fn flush(&mut self) -> Result<bool, NetError> {
        while !self.outbound.is_empty() {
            match self.stream.write(&self.outbound) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(n) => self.outbound.advance(n),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(true)
    }

    /// Register with the poller for readability.
    pub fn register(&mut self, registry: &Registry) -> io::Result<()> {
        let token = self.token();
        self.interest = Interest::READABLE;
        registry.register(&mut self.stream, token, self.interest)
    }

    /// Ask for writability only while bytes are queued.
    pub fn update_interest(&mut self, registry: &Registry) -> io::Result<()> {
        let wanted = if self.outbound.is_empty() {
            Interest::READABLE
        } else {
            Interest::READABLE | Interest::WRITABLE
        };
        if wanted != self.interest {
            let token = self.token();
            registry.reregister(&mut self.stream, token, wanted)?;
            self.interest = wanted;
        }
        Ok(())
    }

    pub fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        registry.deregister(&mut self.stream)
    }
}

/// Registry of open connections using slab allocation.
///
/// Provides O(1) insert, lookup, and remove operations. Slab keys double as
/// poll tokens, so no two entries can share a handle.
pub struct ConnectionRegistry {
    connections: Slab<Connection>,
    max_connections: usize,
}

impl ConnectionRegistry {
    /// Create a new registry with specified maximum capacity.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Slab::with_capacity(max_connections.min(1024)),
            max_connections,
        }
    }

    /// Insert a new connection into the registry.
    ///
    /// Returns `None` if the registry is at capacity; the connection is
    /// dropped, which closes it.
    pub fn insert(&mut self, mut conn: Connection) -> Option<usize> {
        if self.connections.len() >= self.max_connections {
            return None;
        }
        let entry = self.connections.vacant_entry();
        let id = entry.key();
        conn.id = id;
        entry.insert(conn);
        Some(id)
    }

    /// Get an immutable reference to a connection.
    #[cfg(test)]
    pub fn get(&self, id: usize) -> Option<&Connection> {
        self.connections.get(id)
    }

    /// Get a mutable reference to a connection.
    pub fn get_mut(&mut self, id: usize) -> Option<&mut Connection> {
        self.connections.get_mut(id)
    }

    /// Remove a connection from the registry. Removing an absent id is a no-op.
    pub fn remove(&mut self, id: usize) -> Option<Connection> {
        self.connections.try_remove(id)
    }

    /// Check if a connection exists.
    #[cfg(test)]
    pub fn contains(&self, id: usize) -> bool {
        self.connections.contains(id)
    }

    /// Snapshot of the current ids, unaffected by later inserts or removals.
    pub fn handles(&self) -> Vec<usize> {
        self.connections.iter().map(|(id, _)| id).collect()
    }

    /// Remove every connection.
    pub fn drain(&mut self) -> impl Iterator<Item = Connection> + '_ {
        self.connections.drain()
    }

    /// Number of open connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check if there are no connections.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Maximum number of connections allowed.
    pub fn capacity(&self) -> usize {
        self.max_connections
    }
}
