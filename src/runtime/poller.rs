//! Readiness polling over mio (epoll on Linux, kqueue on macOS).
//!
//! mio reports readiness edge-triggered: a handle is reported once per
//! transition, not once per wait. Handles whose last operation made
//! progress are re-armed so the next poll returns them again without
//! waiting; a handle drops out of the set once an operation on it would block.

use mio::{Events, Poll, Registry, Token};
use std::collections::HashSet;
use std::io;
use std::time::Duration;

/// Handles found ready by one poll. Not kept across iterations.
#[derive(Debug, Default)]
pub struct ReadinessSet {
    tokens: HashSet<Token>,
}

impl ReadinessSet {
    pub fn contains(&self, token: Token) -> bool {
        self.tokens.contains(&token)
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }
}

/// The loop's only suspension point.
pub struct ReadinessPoller {
    poll: Poll,
    events: Events,
    carried: HashSet<Token>,
}

impl ReadinessPoller {
    /// Create a poller returning at most `capacity` OS events per wait.
    pub fn new(capacity: usize) -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(capacity),
            carried: HashSet::new(),
        })
    }

    pub fn registry(&self) -> &Registry {
        self.poll.registry()
    }

    /// Wait until a registered handle is ready or `timeout` elapses.
    ///
    /// `None` waits indefinitely. When handles were re-armed the wait does
    /// not block. An empty set means the timeout elapsed with no activity.
    /// Any event on a token counts: readable, writable, hang-up or error all
    /// mean the next operation on that handle will make progress.
    pub fn poll(&mut self, timeout: Option<Duration>) -> io::Result<ReadinessSet> {
        let timeout = if self.carried.is_empty() {
            timeout
        } else {
            Some(Duration::ZERO)
        };

        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            // A signal landed mid-wait; report whatever was carried.
            Err(e) if e.kind() == io::ErrorKind::Interrupted => self.events.clear(),
            Err(e) => return Err(e),
        }

        let mut tokens: HashSet<Token> = self.carried.drain().collect();
        tokens.extend(self.events.iter().map(|event| event.token()));
        Ok(ReadinessSet { tokens })
    }

    /// Report `token` as ready again on the next poll.
    pub fn rearm(&mut self, token: Token) {
        self.carried.insert(token);
    }

    /// Drop any carried readiness for a handle that is going away.
    pub fn forget(&mut self, token: Token) {
        self.carried.remove(&token);
    }
}
