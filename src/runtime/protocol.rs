//! Per-connection protocol dispatch for the event loop.
//!
//! A handler is invoked once per pass for every connection the poller
//! reported ready. It performs a single read, queues any response on the
//! connection, and says whether the connection should stay open.

use crate::error::NetError;
use crate::runtime::Connection;
use std::fmt;

/// Protocol tag carried by each connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Echo,
    Http,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Echo => f.write_str("echo"),
            Protocol::Http => f.write_str("http"),
        }
    }
}

/// What the loop does with a connection after servicing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    KeepOpen,
    /// Close once any queued response has been sent.
    Close,
}

/// Behavior of a connection once it is readable.
///
/// Errors are per-connection: the loop logs them and drops only the
/// connection that produced them. `NetError::WouldBlock` means "nothing to
/// do this pass" and leaves the connection open.
pub trait ProtocolHandler {
    /// Tag recorded on connections served by this handler.
    fn protocol(&self) -> Protocol;

    /// Service one readable connection.
    fn on_readable(&mut self, conn: &mut Connection) -> Result<Disposition, NetError>;
}
