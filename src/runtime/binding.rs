//! Acquisition of listening and datagram endpoints.
//!
//! Addresses are literal `ip:port` strings; name resolution is left to the
//! caller. All endpoints except the blocking listener are non-blocking.

use crate::error::NetError;
use mio::net::{TcpListener, TcpStream, UdpSocket};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

/// Listen backlog for TCP endpoints.
const BACKLOG: i32 = 1024;

fn parse_addr(addr: &str) -> Result<SocketAddr, NetError> {
    addr.parse()
        .map_err(|e| NetError::bind(addr, io::Error::new(io::ErrorKind::InvalidInput, e)))
}

fn listen_socket(
    addr: SocketAddr,
    accept_timeout: Option<Duration>,
) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    match accept_timeout {
        // SO_RCVTIMEO bounds accept() on a blocking listening socket.
        Some(timeout) => socket.set_read_timeout(Some(timeout))?,
        None => socket.set_nonblocking(true)?,
    }
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;

    Ok(socket.into())
}

/// Bind and listen on `addr` with a non-blocking socket.
pub fn open_listener(addr: &str) -> Result<TcpListener, NetError> {
    let parsed = parse_addr(addr)?;
    let listener = listen_socket(parsed, None).map_err(|e| NetError::bind(addr, e))?;
    Ok(TcpListener::from_std(listener))
}

/// Bind and listen on `addr` with a blocking socket whose `accept` gives up
/// after `accept_timeout`, so the caller can check for shutdown in between.
pub fn open_blocking_listener(
    addr: &str,
    accept_timeout: Duration,
) -> Result<std::net::TcpListener, NetError> {
    let parsed = parse_addr(addr)?;
    listen_socket(parsed, Some(accept_timeout)).map_err(|e| NetError::bind(addr, e))
}

/// Accept one pending connection, if any.
///
/// `Ok(None)` means nothing was pending; it is not an error.
pub fn accept_nonblocking(
    listener: &TcpListener,
) -> Result<Option<(TcpStream, SocketAddr)>, NetError> {
    match listener.accept() {
        Ok(pair) => Ok(Some(pair)),
        Err(e) => {
            let err = NetError::from(e);
            if err.is_would_block() {
                Ok(None)
            } else {
                Err(err)
            }
        }
    }
}

/// Bind a non-blocking datagram endpoint on `addr`.
pub fn bind_datagram(addr: &str) -> Result<UdpSocket, NetError> {
    let parsed = parse_addr(addr)?;
    UdpSocket::bind(parsed).map_err(|e| NetError::bind(addr, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_open_listener_ephemeral_port() {
        let listener = open_listener("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
    }

    #[test]
    fn test_address_in_use() {
        let first = open_listener("127.0.0.1:0").unwrap();
        let addr = first.local_addr().unwrap().to_string();

        match open_listener(&addr) {
            Err(NetError::Bind { addr: failed, .. }) => assert_eq!(failed, addr),
            other => panic!("unexpected: {:?}", other.map(|l| l.local_addr())),
        }
    }

    #[test]
    fn test_invalid_address() {
        match open_listener("not-an-address") {
            Err(NetError::Bind { source, .. }) => {
                assert_eq!(source.kind(), io::ErrorKind::InvalidInput)
            }
            other => panic!("unexpected: {:?}", other.map(|l| l.local_addr())),
        }
        assert!(matches!(bind_datagram("::bad"), Err(NetError::Bind { .. })));
    }

    #[test]
    fn test_accept_without_pending_peer() {
        let listener = open_listener("127.0.0.1:0").unwrap();
        assert!(accept_nonblocking(&listener).unwrap().is_none());
    }

    #[test]
    fn test_accept_pending_peer() {
        let listener = open_listener("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = std::net::TcpStream::connect(addr).unwrap();

        // The handshake completes asynchronously; retry briefly.
        let mut accepted = None;
        for _ in 0..100 {
            if let Some(pair) = accept_nonblocking(&listener).unwrap() {
                accepted = Some(pair);
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }

        let (_stream, peer) = accepted.expect("connection was not accepted");
        assert_eq!(peer, client.local_addr().unwrap());
    }

    #[test]
    fn test_blocking_listener_accept_times_out() {
        let listener =
            open_blocking_listener("127.0.0.1:0", Duration::from_millis(50)).unwrap();
        let err = listener.accept().unwrap_err();
        assert!(matches!(
            err.kind(),
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
        ));
    }

    #[test]
    fn test_bind_datagram() {
        let socket = bind_datagram("127.0.0.1:0").unwrap();
        assert_ne!(socket.local_addr().unwrap().port(), 0);
    }
}
