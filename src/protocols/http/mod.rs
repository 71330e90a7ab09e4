//! Minimal HTTP responder protocol.
//!
//! Every connection gets exactly one exchange: the request is read once and
//! logged but never parsed, then the same response is sent and the server
//! closes the connection.
//!
//! ```text
//! HTTP/1.1 200 OK\r\n
//! Connection: close\r\n
//! Content-Type: text/html\r\n
//! \r\n
//! <body from the content provider>
//! ```

pub mod handler;
pub mod response;

pub use handler::MinimalHttpHandler;
pub use response::{HttpReply, HttpResponse};
