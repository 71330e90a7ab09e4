//! Minimal HTTP handler for the event loop and the blocking responder.

use crate::content::ContentProvider;
use crate::error::NetError;
use crate::protocols::http::HttpResponse;
use crate::runtime::{Connection, Disposition, Protocol, ProtocolHandler};
use bytes::BytesMut;
use std::net::SocketAddr;
use tracing::info;

/// Answers every request with the same `200 OK` and closes.
pub struct MinimalHttpHandler {
    content: Box<dyn ContentProvider>,
    buf: Vec<u8>,
}

impl MinimalHttpHandler {
    /// Create a handler reading at most `buffer_size` request bytes.
    pub fn new(content: Box<dyn ContentProvider>, buffer_size: usize) -> Self {
        Self {
            content,
            buf: vec![0; buffer_size.max(1)],
        }
    }

    /// Scratch space for one request read.
    pub fn buffer(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// Log the first `len` bytes of the buffer as a request from `peer` and
    /// build the response.
    pub fn respond(&self, peer: SocketAddr, len: usize) -> Result<BytesMut, NetError> {
        info!(
            peer = %peer,
            request = %String::from_utf8_lossy(&self.buf[..len]),
            "Request"
        );
        let body = self.content.get_body()?;
        Ok(HttpResponse::ok(body).encode())
    }
}

impl ProtocolHandler for MinimalHttpHandler {
    fn protocol(&self) -> Protocol {
        Protocol::Http
    }

    fn on_readable(&mut self, conn: &mut Connection) -> Result<Disposition, NetError> {
        // A half-closed peer sent an empty request; it still gets the page.
        let n = match conn.read_once(&mut self.buf) {
            Ok(n) => n,
            Err(NetError::PeerClosed) => 0,
            Err(e) => return Err(e),
        };
        let response = self.respond(conn.peer(), n)?;
        conn.queue(&response);
        Ok(Disposition::Close)
    }
}
