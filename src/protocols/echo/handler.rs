//! Echo protocol handler for the event loop.

use crate::error::NetError;
use crate::runtime::{Connection, Disposition, Protocol, ProtocolHandler};
use tracing::info;

/// Echoes every read back to the sender.
pub struct EchoHandler {
    buf: Vec<u8>,
}

impl EchoHandler {
    /// Create a handler reading at most `buffer_size` bytes per pass.
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buf: vec![0; buffer_size.max(1)],
        }
    }
}

impl ProtocolHandler for EchoHandler {
    fn protocol(&self) -> Protocol {
        Protocol::Echo
    }

    fn on_readable(&mut self, conn: &mut Connection) -> Result<Disposition, NetError> {
        let n = conn.read_once(&mut self.buf)?;
        let data = &self.buf[..n];

        info!(
            conn_id = conn.id(),
            peer = %conn.peer(),
            bytes = n,
            payload = %String::from_utf8_lossy(data),
            "Echo"
        );

        conn.queue(data);
        Ok(Disposition::KeepOpen)
    }
}
