//! Echo protocol implementation.
//!
//! Whatever a client sends is written back unchanged:
//! - TCP: each read of up to one buffer is echoed on the same connection;
//!   a zero-length read is the peer closing and ends the connection.
//! - UDP: each datagram is sent back to the address it came from (see
//!   `runtime::datagram`).
//!
//! ## Use Cases
//!
//! 1. **Connectivity checks**: confirm a host and port are reachable and
//!    that bytes survive the round trip.
//!
//! 2. **Multiplexing checks**: several clients echoing at once exercise the
//!    event loop's accept, read and flush paths side by side.

pub mod handler;

pub use handler::EchoHandler;
