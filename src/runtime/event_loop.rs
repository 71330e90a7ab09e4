//! Single-threaded, readiness-driven connection multiplexer.
//!
//! Each pass waits on the poller, accepts at most one pending connection,
//! then services every ready connection once, in registry snapshot order.
//! The poll is the only place the loop blocks; every socket is non-blocking.
//! Per-connection failures close that connection and nothing else.

use crate::config::Config;
use crate::error::NetError;
use crate::runtime::binding::{accept_nonblocking, open_listener};
use crate::runtime::{
    ConnState, Connection, ConnectionRegistry, Disposition, ProtocolHandler, ReadinessPoller,
    Shutdown,
};
use mio::net::TcpListener;
use mio::{Interest, Token, Waker};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

const LISTENER_TOKEN: Token = Token(usize::MAX);
const WAKER_TOKEN: Token = Token(usize::MAX - 1);

/// OS events returned per wait.
const EVENT_CAPACITY: usize = 1024;

/// Delay before retrying a failed accept.
const ACCEPT_RETRY: Duration = Duration::from_millis(10);

/// Tunables for one event loop.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub max_connections: usize,
    /// Upper bound on one wait; `None` waits until something is ready.
    pub poll_timeout: Option<Duration>,
    /// Log the wall clock when it changes, at most this often.
    pub heartbeat: Option<Duration>,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            max_connections: 1024,
            poll_timeout: None,
            heartbeat: None,
        }
    }
}

impl From<&Config> for LoopSettings {
    fn from(config: &Config) -> Self {
        Self {
            max_connections: config.max_connections,
            poll_timeout: config.poll_timeout,
            heartbeat: config.heartbeat,
        }
    }
}

/// Owns the listener, the poller, every accepted connection and the handler.
pub struct EventLoop<H: ProtocolHandler> {
    listener: TcpListener,
    local_addr: SocketAddr,
    poller: ReadinessPoller,
    registry: ConnectionRegistry,
    handler: H,
    settings: LoopSettings,
    shutdown: Shutdown,
    waker_key: usize,
    /// Set after a failed accept; the backlog gets no new edge on its own.
    accept_retry: bool,
    last_beat: String,
}

impl<H: ProtocolHandler> EventLoop<H> {
    /// Bind `addr` and prepare to serve it with `handler`.
    pub fn bind(
        addr: &str,
        handler: H,
        settings: LoopSettings,
        shutdown: &Shutdown,
    ) -> Result<Self, NetError> {
        let mut listener = open_listener(addr)?;
        let local_addr = listener.local_addr()?;

        let poller = ReadinessPoller::new(EVENT_CAPACITY)?;
        poller
            .registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;
        let waker_key = shutdown.attach(Waker::new(poller.registry(), WAKER_TOKEN)?);

        Ok(Self {
            listener,
            local_addr,
            poller,
            registry: ConnectionRegistry::new(settings.max_connections),
            handler,
            settings,
            shutdown: shutdown.clone(),
            waker_key,
            accept_retry: false,
            last_beat: String::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of connections currently tracked.
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Serve until shutdown is requested, then close everything.
    pub fn run(mut self) -> io::Result<()> {
        info!(
            addr = %self.local_addr,
            protocol = %self.handler.protocol(),
            "===== Listening ====="
        );

        while !self.shutdown.is_triggered() {
            self.turn()?;
        }

        self.teardown();
        Ok(())
    }

    /// One pass: wait, accept once, service each ready connection once.
    pub fn turn(&mut self) -> io::Result<()> {
        let ready = self.poller.poll(self.wait_timeout())?;
        if ready.is_empty() {
            trace!("No activity");
        } else {
            trace!(ready = ready.len(), "Poll returned");
        }

        let retry = std::mem::take(&mut self.accept_retry);
        if retry || ready.contains(LISTENER_TOKEN) {
            self.accept_one();
        }

        for id in self.registry.handles() {
            if ready.contains(Token(id)) {
                self.service_connection(id);
            }
        }

        self.heartbeat();
        Ok(())
    }

    fn wait_timeout(&self) -> Option<Duration> {
        let retry = self.accept_retry.then_some(ACCEPT_RETRY);
        [self.settings.poll_timeout, self.settings.heartbeat, retry]
            .into_iter()
            .flatten()
            .min()
    }

    fn accept_one(&mut self) {
        let (stream, peer) = match accept_nonblocking(&self.listener) {
            Ok(Some(pair)) => pair,
            Ok(None) => return,
            Err(e) => {
                self.accept_failed(e);
                return;
            }
        };

        // More connections may be queued behind this one.
        self.poller.rearm(LISTENER_TOKEN);

        let conn = Connection::new(stream, peer, self.handler.protocol());
        let Some(id) = self.registry.insert(conn) else {
            warn!(
                peer = %peer,
                limit = self.registry.capacity(),
                "Connection limit reached, dropping"
            );
            return;
        };

        let registry = self.poller.registry();
        let registered = match self.registry.get_mut(id) {
            Some(conn) => conn.register(registry),
            None => return,
        };
        if let Err(e) = registered {
            warn!(conn_id = id, peer = %peer, error = %e, "Failed to register connection");
            self.registry.remove(id);
            return;
        }

        info!(conn_id = id, peer = %peer, "Connected");
    }

    /// Retry shortly; EMFILE and friends clear without a new readiness edge.
    fn accept_failed(&mut self, e: NetError) {
        warn!(error = %e, "Accept failed");
        self.accept_retry = true;
    }

    fn service_connection(&mut self, id: usize) {
        let Some(conn) = self.registry.get_mut(id) else {
            return;
        };
        let peer = conn.peer();
        // Reads are held back until the previous response is out.
        let backlogged = conn.pending() > 0;

        let disposition = if conn.state() == ConnState::Draining {
            Disposition::Close
        } else if backlogged {
            Disposition::KeepOpen
        } else {
            match self.handler.on_readable(conn) {
                Ok(disposition) => {
                    self.poller.rearm(Token(id));
                    disposition
                }
                Err(NetError::WouldBlock) => Disposition::KeepOpen,
                Err(NetError::PeerClosed) => {
                    info!(conn_id = id, peer = %peer, "Closed connection");
                    self.close(id);
                    return;
                }
                Err(e) => {
                    warn!(conn_id = id, peer = %peer, error = %e, "Dropping connection");
                    self.close(id);
                    return;
                }
            }
        };

        let flushed = match conn.flush() {
            Ok(done) => conn
                .update_interest(self.poller.registry())
                .map(|()| done)
                .map_err(NetError::from),
            Err(e) => Err(e),
        };

        match flushed {
            Ok(true) if disposition == Disposition::Close => {
                debug!(conn_id = id, peer = %peer, "Response sent, closing");
                self.close(id);
            }
            Ok(true) => {
                if backlogged {
                    self.poller.rearm(Token(id));
                }
            }
            Ok(false) => {
                trace!(conn_id = id, pending = conn.pending(), "Write would block");
                if disposition == Disposition::Close {
                    conn.begin_draining();
                }
            }
            Err(e) => {
                warn!(conn_id = id, peer = %peer, error = %e, "Dropping connection");
                self.close(id);
            }
        }
    }

    /// Release a connection. A second close of the same id is a no-op.
    fn close(&mut self, id: usize) {
        self.poller.forget(Token(id));
        if let Some(mut conn) = self.registry.remove(id) {
            let _ = conn.deregister(self.poller.registry());
            debug!(
                conn_id = id,
                peer = %conn.peer(),
                protocol = %conn.protocol(),
                "Connection released"
            );
        }
    }

    fn heartbeat(&mut self) {
        if self.settings.heartbeat.is_none() {
            return;
        }
        let now = chrono::Local::now().format("%a %b %e %H:%M:%S %Y").to_string();
        if now != self.last_beat {
            info!(time = %now, connections = self.registry.len(), "Heartbeat");
            self.last_beat = now;
        }
    }

    /// Close every tracked connection and stop listening.
    fn teardown(&mut self) {
        let registry = self.poller.registry();
        let mut closed = 0;
        for mut conn in self.registry.drain() {
            let _ = conn.deregister(registry);
            closed += 1;
        }
        let _ = registry.deregister(&mut self.listener);
        info!(addr = %self.local_addr, closed, "Shut down");
    }
}

impl<H: ProtocolHandler> Drop for EventLoop<H> {
    fn drop(&mut self) {
        if !self.registry.is_empty() {
            self.teardown();
        }
        self.shutdown.detach(self.waker_key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{FileBody, StaticBody};
    use crate::protocols::echo::EchoHandler;
    use crate::protocols::http::MinimalHttpHandler;
    use std::io::{Read, Write};
    use std::net::{Shutdown as SocketShutdown, TcpStream};
    use std::sync::mpsc;
    use std::thread::{self, JoinHandle};

    fn test_settings() -> LoopSettings {
        LoopSettings {
            max_connections: 64,
            poll_timeout: Some(Duration::from_millis(20)),
            heartbeat: None,
        }
    }

    /// Run a loop on its own thread; returns its address and join handle.
    fn spawn_loop<H, F>(make: F, shutdown: &Shutdown) -> (SocketAddr, JoinHandle<io::Result<()>>)
    where
        H: ProtocolHandler,
        F: FnOnce() -> H + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let shutdown = shutdown.clone();
        let handle = thread::spawn(move || {
            let ev = EventLoop::bind("127.0.0.1:0", make(), LoopSettings::default(), &shutdown)
                .unwrap();
            tx.send(ev.local_addr()).unwrap();
            ev.run()
        });
        (rx.recv().unwrap(), handle)
    }

    fn connect(addr: SocketAddr) -> TcpStream {
        let stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        stream
    }

    fn turn_until<H: ProtocolHandler>(
        ev: &mut EventLoop<H>,
        mut done: impl FnMut(&EventLoop<H>) -> bool,
    ) {
        for _ in 0..250 {
            if done(&*ev) {
                return;
            }
            ev.turn().unwrap();
        }
        panic!("condition not reached");
    }

    #[test]
    fn test_echo_round_trip() {
        let shutdown = Shutdown::new();
        let (addr, handle) = spawn_loop(|| EchoHandler::new(1024), &shutdown);

        let mut client = connect(addr);
        for payload in [&b"hello"[..], b"\x00\xffbinary\r\n", b"x"] {
            client.write_all(payload).unwrap();
            let mut buf = vec![0u8; payload.len()];
            client.read_exact(&mut buf).unwrap();
            assert_eq!(buf, payload);
        }

        shutdown.trigger();
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn test_payload_larger_than_buffer() {
        let shutdown = Shutdown::new();
        let (addr, handle) = spawn_loop(|| EchoHandler::new(16), &shutdown);

        let payload: Vec<u8> = (0..256 * 1024).map(|i| (i % 251) as u8).collect();
        let mut client = connect(addr);
        let mut reader = client.try_clone().unwrap();

        let expected = payload.len();
        let reader_thread = thread::spawn(move || {
            let mut received = vec![0u8; expected];
            reader.read_exact(&mut received).unwrap();
            received
        });

        client.write_all(&payload).unwrap();
        assert_eq!(reader_thread.join().unwrap(), payload);

        shutdown.trigger();
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn test_interleaved_clients() {
        let shutdown = Shutdown::new();
        let (addr, handle) = spawn_loop(|| EchoHandler::new(1024), &shutdown);

        let mut first = connect(addr);
        let mut second = connect(addr);

        // First client's data is outstanding while the second is served.
        first.write_all(b"one").unwrap();
        second.write_all(b"two").unwrap();

        let mut buf = [0u8; 3];
        second.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"two");
        first.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"one");

        second.write_all(b"2nd").unwrap();
        second.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"2nd");

        shutdown.trigger();
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn test_silent_close_removes_connection() {
        let shutdown = Shutdown::new();
        let mut ev = EventLoop::bind(
            "127.0.0.1:0",
            EchoHandler::new(1024),
            test_settings(),
            &shutdown,
        )
        .unwrap();

        let mut client = connect(ev.local_addr());
        turn_until(&mut ev, |ev| ev.connection_count() == 1);

        client.shutdown(SocketShutdown::Write).unwrap();
        turn_until(&mut ev, |ev| ev.connection_count() == 0);

        // Nothing was written back before the server closed.
        let mut received = Vec::new();
        client.read_to_end(&mut received).unwrap();
        assert!(received.is_empty());
    }

    #[test]
    fn test_shutdown_closes_all_connections() {
        let shutdown = Shutdown::new();
        let mut ev = EventLoop::bind(
            "127.0.0.1:0",
            EchoHandler::new(1024),
            test_settings(),
            &shutdown,
        )
        .unwrap();
        let addr = ev.local_addr();

        let mut clients: Vec<TcpStream> = (0..3).map(|_| connect(addr)).collect();
        turn_until(&mut ev, |ev| ev.connection_count() == 3);

        shutdown.trigger();
        ev.run().unwrap();

        for client in clients.iter_mut() {
            let mut received = Vec::new();
            // EOF (or reset) once the server side is released.
            let _ = client.read_to_end(&mut received);
            assert!(received.is_empty());
        }
        assert!(TcpStream::connect(addr).is_err());
    }

    #[test]
    fn test_connection_limit() {
        let shutdown = Shutdown::new();
        let settings = LoopSettings {
            max_connections: 1,
            ..test_settings()
        };
        let mut ev =
            EventLoop::bind("127.0.0.1:0", EchoHandler::new(1024), settings, &shutdown).unwrap();

        let _kept = connect(ev.local_addr());
        turn_until(&mut ev, |ev| ev.connection_count() == 1);

        let mut rejected = connect(ev.local_addr());
        for _ in 0..20 {
            ev.turn().unwrap();
        }
        assert_eq!(ev.connection_count(), 1);

        let mut received = Vec::new();
        let _ = rejected.read_to_end(&mut received);
        assert!(received.is_empty());
    }

    #[test]
    fn test_failed_accept_retries_backlog() {
        let shutdown = Shutdown::new();
        let mut ev = EventLoop::bind(
            "127.0.0.1:0",
            EchoHandler::new(1024),
            test_settings(),
            &shutdown,
        )
        .unwrap();
        let _client = connect(ev.local_addr());

        // Consume the listener's edge without accepting.
        let mut seen = false;
        for _ in 0..100 {
            let ready = ev.poller.poll(Some(Duration::from_millis(50))).unwrap();
            if ready.contains(LISTENER_TOKEN) {
                seen = true;
                break;
            }
        }
        assert!(seen);
        ev.turn().unwrap();
        assert_eq!(ev.connection_count(), 0);

        ev.accept_failed(NetError::Transient(io::Error::new(
            io::ErrorKind::Other,
            "too many open files",
        )));
        assert_eq!(ev.wait_timeout(), Some(ACCEPT_RETRY));
        ev.turn().unwrap();
        assert_eq!(ev.connection_count(), 1);
    }

    #[test]
    fn test_drop_detaches_waker() {
        let shutdown = Shutdown::new();
        let ev = EventLoop::bind(
            "127.0.0.1:0",
            EchoHandler::new(1024),
            test_settings(),
            &shutdown,
        )
        .unwrap();
        assert_eq!(shutdown.attached(), 1);

        drop(ev);
        assert_eq!(shutdown.attached(), 0);
        shutdown.trigger();
    }

    #[test]
    fn test_http_response_then_close() {
        let shutdown = Shutdown::new();
        let (addr, handle) = spawn_loop(
            || MinimalHttpHandler::new(Box::new(StaticBody::new("<h1>hi</h1>")), 1024),
            &shutdown,
        );

        let mut client = connect(addr);
        client.write_all(b"POST /anything HTTP/1.0\r\n\r\n").unwrap();

        let mut received = Vec::new();
        client.read_to_end(&mut received).unwrap();
        let text = String::from_utf8(received).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Connection: close\r\n"));
        assert!(text.ends_with("\r\n\r\n<h1>hi</h1>"));

        shutdown.trigger();
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn test_http_half_closed_client_gets_response() {
        let shutdown = Shutdown::new();
        let mut ev = EventLoop::bind(
            "127.0.0.1:0",
            MinimalHttpHandler::new(Box::new(StaticBody::new("<h1>hi</h1>")), 1024),
            test_settings(),
            &shutdown,
        )
        .unwrap();

        let mut client = connect(ev.local_addr());
        turn_until(&mut ev, |ev| ev.connection_count() == 1);

        client.shutdown(SocketShutdown::Write).unwrap();
        turn_until(&mut ev, |ev| ev.connection_count() == 0);

        let mut received = Vec::new();
        client.read_to_end(&mut received).unwrap();
        let text = String::from_utf8(received).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.ends_with("<h1>hi</h1>"));
    }

    #[test]
    fn test_http_large_body_fully_sent() {
        let body = "a".repeat(4 * 1024 * 1024);
        let expected_len = body.len();
        let shutdown = Shutdown::new();
        let (addr, handle) = spawn_loop(
            move || MinimalHttpHandler::new(Box::new(StaticBody::new(body)), 1024),
            &shutdown,
        );

        let mut client = connect(addr);
        client.write_all(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        let mut received = Vec::new();
        client.read_to_end(&mut received).unwrap();

        let head_len = received.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;
        assert_eq!(received.len() - head_len, expected_len);

        shutdown.trigger();
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn test_content_failure_drops_only_that_connection() {
        let shutdown = Shutdown::new();
        let mut ev = EventLoop::bind(
            "127.0.0.1:0",
            MinimalHttpHandler::new(Box::new(FileBody::new("/nonexistent/page.html")), 1024),
            test_settings(),
            &shutdown,
        )
        .unwrap();
        let addr = ev.local_addr();

        let mut failing = connect(addr);
        let idle = connect(addr);
        turn_until(&mut ev, |ev| ev.connection_count() == 2);

        failing.write_all(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        turn_until(&mut ev, |ev| ev.connection_count() == 1);

        let mut received = Vec::new();
        let _ = failing.read_to_end(&mut received);
        assert!(received.is_empty());

        // The loop is still live and accepting.
        let _late = connect(addr);
        turn_until(&mut ev, |ev| ev.connection_count() == 2);
        drop(idle);
    }
}
