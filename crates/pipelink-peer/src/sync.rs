use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Lock a mutex, recovering the data if a panicking thread poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A one-shot latch that threads can wait on with a deadline.
#[derive(Debug, Default)]
pub(crate) struct Signal {
    fired: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fire(&self) {
        *lock(&self.fired) = true;
        self.cond.notify_all();
    }

    pub(crate) fn is_fired(&self) -> bool {
        *lock(&self.fired)
    }

    pub(crate) fn wait(&self) {
        let mut fired = lock(&self.fired);
        while !*fired {
            fired = self
                .cond
                .wait(fired)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Wait until fired or `timeout` passes. Returns whether it fired.
    pub(crate) fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut fired = lock(&self.fired);
        while !*fired {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            fired = self
                .cond
                .wait_timeout(fired, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}
