//! Cooperative cancellation for the server loops.
//!
//! A `Shutdown` is a shared flag checked once per loop iteration. Pollers
//! attach a `mio::Waker` so that triggering the flag also interrupts a wait
//! that would otherwise block indefinitely.

use mio::Waker;
use slab::Slab;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

#[derive(Default)]
struct Inner {
    requested: AtomicBool,
    wakers: Mutex<Slab<Waker>>,
}

/// Cloneable shutdown token.
#[derive(Clone, Default)]
pub struct Shutdown {
    inner: Arc<Inner>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown and wake every attached poller.
    pub fn trigger(&self) {
        self.inner.requested.store(true, Ordering::SeqCst);

        let wakers = self.wakers();
        for (_, waker) in wakers.iter() {
            if let Err(e) = waker.wake() {
                warn!(error = %e, "Failed to wake poller");
            }
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    /// Attach a waker belonging to a poller that should observe shutdown.
    ///
    /// If shutdown was already requested the waker fires immediately. The
    /// returned key detaches it again before its poller goes away.
    pub fn attach(&self, waker: Waker) -> usize {
        if self.is_triggered() {
            let _ = waker.wake();
        }
        self.wakers().insert(waker)
    }

    /// Detach a waker. Unknown keys are ignored.
    pub fn detach(&self, key: usize) {
        self.wakers().try_remove(key);
    }

    #[cfg(test)]
    pub(crate) fn attached(&self) -> usize {
        self.wakers().len()
    }

    fn wakers(&self) -> std::sync::MutexGuard<'_, Slab<Waker>> {
        match self.inner.wakers.lock() {
            Ok(wakers) => wakers,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Trigger on Ctrl-C (SIGINT).
    pub fn install_ctrlc(&self) -> Result<(), ctrlc::Error> {
        let shutdown = self.clone();
        ctrlc::set_handler(move || {
            info!("KeyboardInterrupt");
            shutdown.trigger();
        })
    }
}

impl std::fmt::Debug for Shutdown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shutdown")
            .field("triggered", &self.is_triggered())
            .finish()
    }
}
