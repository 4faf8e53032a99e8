//! Two-tier completion signal
//!
//! A transaction sets its completion flag once, after releasing its locks.
//! Threads waiting for one of its keys park until the flag is set.
//!
//! The common case has no waiter, so `notify` is an atomic store plus an
//! atomic load. Only when a waiter has registered does `notify` take the
//! mutex and signal the condition variable.
//!
//! ## Ordering
//!
//! The waiter increments `waiters` and then reads `complete`; the notifier
//! stores `complete` and then reads `waiters`. Both use `SeqCst`, so at least
//! one side sees the other: either the waiter sees the flag and never parks,
//! or the notifier sees the waiter and signals under the mutex the waiter
//! holds until it parks.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Monotonic completion flag with timed wait
#[derive(Debug, Default)]
pub struct CompletionSignal {
    complete: AtomicBool,
    waiters: AtomicUsize,
    lock: Mutex<()>,
    cond: Condvar,
}

impl CompletionSignal {
    /// Create an unset signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if the signal was set
    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::SeqCst)
    }

    /// Set the flag and wake any waiter
    pub fn notify(&self) {
        self.complete.store(true, Ordering::SeqCst);
        if self.waiters.load(Ordering::SeqCst) > 0 {
            let _guard = self.lock.lock();
            self.cond.notify_all();
        }
    }

    /// Wait up to `timeout` for the flag
    ///
    /// Returns the flag value when the wait ends.
    pub fn wait(&self, timeout: Duration) -> bool {
        if self.is_complete() {
            return true;
        }
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock.lock();
        self.waiters.fetch_add(1, Ordering::SeqCst);
        while !self.complete.load(Ordering::SeqCst) {
            if self.cond.wait_until(&mut guard, deadline).timed_out() {
                break;
            }
        }
        self.waiters.fetch_sub(1, Ordering::SeqCst);
        self.is_complete()
    }
}
