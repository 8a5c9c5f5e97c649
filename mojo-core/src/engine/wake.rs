//! Edge-triggered wake-up from the real-time thread to the worker.
//!
//! `signal()` is an atomic store plus `Thread::unpark`, neither of which
//! allocates or takes a lock, so it is safe to call from the audio callback.
//! `wait()` parks the worker until signaled or until the timeout elapses.
//!
//! Semantics:
//! - a signal raised before `wait()` starts is observed by that wait;
//! - several signals before a wait collapse into one wake;
//! - spurious OS wake-ups are absorbed and never reported as a signal.

use std::sync::atomic::{fence, AtomicBool, Ordering};
use std::sync::OnceLock;
use std::thread::{self, Thread};
use std::time::{Duration, Instant};

/// Binary wake signal with a single registered waiter.
///
/// The first thread to call [`WakeSignal::wait`] becomes the waiter; only that
/// thread may wait afterwards.
#[derive(Debug, Default)]
pub struct WakeSignal {
    signaled: AtomicBool,
    waiter: OnceLock<Thread>,
}

impl WakeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the signal and unpark the waiter if one is registered.
    pub fn signal(&self) {
        self.signaled.store(true, Ordering::SeqCst);
        // Pairs with the fence in `wait`: either this load sees the waiter or
        // the waiter's swap sees the flag.
        fence(Ordering::SeqCst);
        if let Some(waiter) = self.waiter.get() {
            waiter.unpark();
        }
    }

    /// Block until signaled or `timeout` elapses.
    ///
    /// Returns `true` when a signal was consumed, `false` on timeout.
    pub fn wait(&self, timeout: Duration) -> bool {
        let waiter = self.waiter.get_or_init(thread::current);
        debug_assert_eq!(
            waiter.id(),
            thread::current().id(),
            "WakeSignal::wait called from a second thread"
        );

        fence(Ordering::SeqCst);

        let deadline = Instant::now() + timeout;
        loop {
            if self.signaled.swap(false, Ordering::SeqCst) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::park_timeout(deadline - now);
        }
    }

    /// Whether a signal is pending (not yet consumed by a wait).
    pub fn is_signaled(&self) -> bool {
        self.signaled.load(Ordering::Acquire)
    }
}
