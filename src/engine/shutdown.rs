//! Process-wide shutdown coordination.
//!
//! The gate has two phases: *running*, where every dispatch start acquires a
//! counted permit, and *shutting down*, where no new permit is handed out
//! and outstanding permits drain as attempts complete. The transition is
//! one-way.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, Notify};

/// Counting permit gate that refuses new dispatches once shutdown begins.
///
/// Cloning is cheap; all clones share the same state.
#[derive(Debug, Clone)]
pub struct ShutdownGate {
    inner: Arc<GateInner>,
}

#[derive(Debug)]
struct GateInner {
    in_flight: AtomicUsize,
    closed: AtomicBool,
    signal: watch::Sender<bool>,
    drained: Notify,
}

impl ShutdownGate {
    /// Creates a gate in the running phase.
    pub fn new() -> Self {
        let (signal, _) = watch::channel(false);
        Self {
            inner: Arc::new(GateInner {
                in_flight: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
                signal,
                drained: Notify::new(),
            }),
        }
    }

    /// Acquires a dispatch permit, or None once shutdown began.
    ///
    /// The permit is released on drop.
    pub fn acquire(&self) -> Option<ShutdownPermit> {
        if self.inner.closed.load(Ordering::Acquire) {
            return None;
        }
        self.inner.in_flight.fetch_add(1, Ordering::AcqRel);
        // Re-check: shutdown may have begun between the check and the add.
        if self.inner.closed.load(Ordering::Acquire) {
            self.release_one();
            return None;
        }
        Some(ShutdownPermit {
            gate: self.inner.clone(),
        })
    }

    /// Begins shutdown. No new permits are handed out afterwards;
    /// outstanding permits drain as their attempts complete.
    pub fn begin_shutdown(&self) {
        self.inner.closed.store(true, Ordering::Release);
        // send_replace updates the value even with no live receivers, so a
        // later subscriber still observes the shutdown.
        self.inner.signal.send_replace(true);
        if self.inner.in_flight.load(Ordering::Acquire) == 0 {
            self.inner.drained.notify_waiters();
        }
    }

    /// Returns true once shutdown began.
    pub fn is_shutdown(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Number of permits currently outstanding.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// A receiver that observes the shutdown signal.
    ///
    /// The blocking-command supervisor watches this to abandon server-side
    /// waits when the engine goes away.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.inner.signal.subscribe()
    }

    /// Resolves once shutdown began and every outstanding permit was
    /// released.
    pub async fn drained(&self) {
        loop {
            let notified = self.inner.drained.notified();
            if self.inner.closed.load(Ordering::Acquire)
                && self.inner.in_flight.load(Ordering::Acquire) == 0
            {
                return;
            }
            notified.await;
        }
    }

    fn release_one(&self) {
        self.inner.release_one();
    }
}

impl GateInner {
    fn release_one(&self) {
        let prev = self.in_flight.fetch_sub(1, Ordering::AcqRel);
        if prev == 1 && self.closed.load(Ordering::Acquire) {
            self.drained.notify_waiters();
        }
    }
}

impl Default for ShutdownGate {
    fn default() -> Self {
        Self::new()
    }
}

/// A counted dispatch permit. Released on drop.
#[derive(Debug)]
pub struct ShutdownPermit {
    gate: Arc<GateInner>,
}

impl Drop for ShutdownPermit {
    fn drop(&mut self) {
        self.gate.release_one();
    }
}
