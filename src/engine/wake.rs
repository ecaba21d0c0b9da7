//! In-process wake-up for consumers blocked in `get`.
//!
//! Only reaches threads sharing the same queue handle. Writers in other
//! processes are picked up by the consumer's bounded re-poll instead.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Epoch counter bumped by every successful `put`.
///
/// A consumer reads the epoch before its dequeue attempt and then waits for
/// it to move, so a `put` landing between the failed attempt and the wait is
/// never missed.
#[derive(Debug, Default)]
pub(crate) struct WakeSignal {
    epoch: Mutex<u64>,
    cond: Condvar,
}

impl WakeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn epoch(&self) -> u64 {
        *self.epoch.lock()
    }

    pub fn notify(&self) {
        {
            let mut epoch = self.epoch.lock();
            *epoch = epoch.wrapping_add(1);
        }
        self.cond.notify_all();
    }

    /// Block until the epoch differs from `seen` or `timeout` elapses.
    /// Returns whether the epoch moved.
    pub fn wait_past(&self, seen: u64, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut epoch = self.epoch.lock();
        while *epoch == seen {
            match deadline {
                Some(deadline) => {
                    if self.cond.wait_until(&mut epoch, deadline).timed_out() {
                        return *epoch != seen;
                    }
                }
                None => self.cond.wait(&mut epoch),
            }
        }
        true
    }
}
