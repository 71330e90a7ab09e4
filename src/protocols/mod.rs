//! Protocol implementations.
//!
//! Each protocol provides a `ProtocolHandler` driven by the runtime's
//! event loop.
//!
//! - `echo`: send bytes back unchanged (TCP and UDP)
//! - `http`: a fixed single-exchange HTTP response

pub mod echo;
pub mod http;
