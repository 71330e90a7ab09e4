//! Clients for the echo and HTTP diagnostics.
//!
//! These are plain blocking sockets with read timeouts; each exchange sends
//! one message and waits for one reply.

use crate::config::{Config, Mode};
use crate::error::NetError;
use crate::protocols::http::HttpReply;
use std::io::{self, BufRead, Read, Write};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, TcpStream, UdpSocket};
use std::time::Duration;
use tracing::info;

/// Maximum reply read per UDP exchange; no UDP payload is larger.
const UDP_REPLY_SIZE: usize = 64 * 1024;

fn parse_target(target: &str) -> Result<SocketAddr, NetError> {
    target.parse().map_err(|e| {
        NetError::Transient(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid address {target}: {e}"),
        ))
    })
}

/// TCP echo client on one long-lived connection.
pub struct TcpEchoClient {
    stream: TcpStream,
}

impl TcpEchoClient {
    pub fn connect(addr: SocketAddr, timeout: Duration) -> Result<Self, NetError> {
        let stream = TcpStream::connect_timeout(&addr, timeout)?;
        stream.set_read_timeout(Some(timeout))?;
        Ok(Self { stream })
    }

    /// Send `payload` and read back the same number of bytes.
    ///
    /// `None` means the server closed the connection before replying.
    pub fn exchange(&mut self, payload: &[u8]) -> Result<Option<Vec<u8>>, NetError> {
        self.stream.write_all(payload)?;

        let mut reply = vec![0u8; payload.len()];
        let mut filled = 0;
        while filled < reply.len() {
            match self.stream.read(&mut reply[filled..]) {
                Ok(0) if filled == 0 => return Ok(None),
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                // Blocking reads report an elapsed timeout as WouldBlock.
                Err(e) => return Err(NetError::Transient(e)),
            }
        }
        reply.truncate(filled);
        Ok(Some(reply))
    }
}

/// UDP echo client bound to one server address.
pub struct UdpEchoClient {
    socket: UdpSocket,
}

impl UdpEchoClient {
    pub fn connect(addr: SocketAddr, timeout: Duration) -> Result<Self, NetError> {
        let local: SocketAddr = match addr {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = UdpSocket::bind(local)?;
        socket.connect(addr)?;
        socket.set_read_timeout(Some(timeout))?;
        Ok(Self { socket })
    }

    /// Send one datagram and wait for the reply.
    ///
    /// `None` means no reply arrived within the timeout.
    pub fn exchange(&self, payload: &[u8]) -> Result<Option<Vec<u8>>, NetError> {
        self.socket.send(payload)?;

        let mut buf = vec![0u8; UDP_REPLY_SIZE];
        match self.socket.recv(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(Some(buf))
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(None)
            }
            Err(e) => Err(NetError::Transient(e)),
        }
    }
}

/// Send `GET path` and read the response until the server closes.
pub fn http_get(addr: SocketAddr, path: &str, timeout: Duration) -> Result<HttpReply, NetError> {
    let mut stream = TcpStream::connect_timeout(&addr, timeout)?;
    stream.set_read_timeout(Some(timeout))?;

    let request = format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes())?;

    let mut data = Vec::new();
    stream
        .read_to_end(&mut data)
        .map_err(NetError::Transient)?;
    HttpReply::parse(&data)
}

/// Run the client selected by `config.mode`, reading messages from stdin.
pub fn run(config: &Config) -> Result<(), NetError> {
    let addr = parse_target(&config.address)?;
    match config.mode {
        Mode::TcpClient => {
            let mut client = TcpEchoClient::connect(addr, config.client_timeout)?;
            info!(addr = %addr, "Connect to echo server");
            prompt_loop(|line| match client.exchange(line.as_bytes())? {
                Some(reply) => {
                    info!(reply = %String::from_utf8_lossy(&reply), "recv");
                    Ok(true)
                }
                None => {
                    info!("server closed connection.");
                    Ok(false)
                }
            })
        }
        Mode::UdpClient => {
            let client = UdpEchoClient::connect(addr, config.client_timeout)?;
            info!(addr = %addr, "Connect to echo server");
            prompt_loop(|line| {
                match client.exchange(line.as_bytes())? {
                    Some(reply) => info!(reply = %String::from_utf8_lossy(&reply), "recv"),
                    None => info!("No response"),
                }
                Ok(true)
            })
        }
        Mode::HttpClient => {
            let reply = http_get(addr, &config.http_path, config.client_timeout)?;
            println!("Request URL: {addr}{}\n", config.http_path);
            println!("HTTP/{} {} {}", reply.version, reply.status, reply.reason);
            for (name, value) in &reply.headers {
                println!("{name}: {value}");
            }
            println!("\nBody:\n{}", String::from_utf8_lossy(&reply.body));
            Ok(())
        }
        other => Err(NetError::Transient(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{other:?} is a server mode"),
        ))),
    }
}

/// Prompt for lines on stdin until EOF or `send` returns false.
fn prompt_loop(mut send: impl FnMut(&str) -> Result<bool, NetError>) -> Result<(), NetError> {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("please input message: ");
        io::stdout().flush()?;

        let Some(line) = lines.next() else {
            return Ok(());
        };
        let line = line?;
        if line.is_empty() {
            continue;
        }
        info!(message = %line, "send");
        if !send(&line)? {
            return Ok(());
        }
    }
}
