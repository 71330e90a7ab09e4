//! Error taxonomy shared by the listeners, the event loop and the clients.
//!
//! Every socket operation reports through [`NetError`], so the difference
//! between an expected non-blocking gap (`WouldBlock`), an orderly peer close
//! and a real fault is visible in the type rather than in a catch-all.

use std::io;
use thiserror::Error;

/// Outcome of a failed (or not-yet-possible) socket operation.
#[derive(Debug, Error)]
pub enum NetError {
    /// The operation cannot complete right now; retry on a later pass.
    #[error("operation would block")]
    WouldBlock,

    /// A read returned zero bytes: the peer has finished sending.
    #[error("peer closed the connection")]
    PeerClosed,

    /// The listening or datagram endpoint could not be acquired.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// The content provider could not produce a response body.
    #[error("content unavailable from {resource}: {source}")]
    ContentUnavailable {
        resource: String,
        #[source]
        source: io::Error,
    },

    /// Unexpected socket error on a single handle.
    #[error("i/o error: {0}")]
    Transient(io::Error),

    /// A peer sent something that is not an HTTP response.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl NetError {
    /// Build a bind error for `addr`.
    pub fn bind(addr: impl Into<String>, source: io::Error) -> Self {
        NetError::Bind {
            addr: addr.into(),
            source,
        }
    }

    /// True for the outcomes that only mean "nothing to do this cycle".
    pub fn is_would_block(&self) -> bool {
        matches!(self, NetError::WouldBlock)
    }
}

impl From<io::Error> for NetError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => NetError::WouldBlock,
            _ => NetError::Transient(e),
        }
    }
}
