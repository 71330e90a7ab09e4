//! Blocking HTTP responder: one connection at a time, one exchange each.

use crate::error::NetError;
use crate::protocols::http::MinimalHttpHandler;
use crate::runtime::Shutdown;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::Duration;
use tracing::{info, warn};

/// How long a connected client gets to send its request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Serve `listener` until shutdown is requested.
///
/// `listener` should come from `binding::open_blocking_listener`, so that
/// `accept` returns periodically and the shutdown flag is observed.
pub fn serve_blocking(
    listener: TcpListener,
    mut handler: MinimalHttpHandler,
    shutdown: &Shutdown,
) -> io::Result<()> {
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, "===== Listening =====");

    while !shutdown.is_triggered() {
        let (mut stream, peer) = match listener.accept() {
            Ok(pair) => pair,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                continue
            }
            Err(e) => {
                warn!(error = %e, "Accept failed");
                continue;
            }
        };

        info!(peer = %peer, "Connected");
        match respond_once(&mut stream, peer, &mut handler) {
            Ok(()) => info!(peer = %peer, "Response sent, closing"),
            Err(e) => warn!(peer = %peer, error = %e, "Dropping connection"),
        }
    }

    info!(addr = %local_addr, "Shut down");
    Ok(())
}

fn respond_once(
    stream: &mut TcpStream,
    peer: SocketAddr,
    handler: &mut MinimalHttpHandler,
) -> Result<(), NetError> {
    stream.set_read_timeout(Some(REQUEST_TIMEOUT))?;

    // Zero bytes is an empty request from a half-closed peer.
    let n = match stream.read(handler.buffer()) {
        Ok(n) => n,
        // A blocking read only reports WouldBlock when the timeout elapsed.
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Err(NetError::Transient(e)),
        Err(e) => return Err(e.into()),
    };

    let response = handler.respond(peer, n)?;
    stream.write_all(&response)?;
    stream.flush()?;
    Ok(())
}
