// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Interruptible sleeps for background threads.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// A one-shot shutdown flag that wakes sleepers when raised.
#[derive(Default)]
pub(crate) struct ShutdownSignal {
    raised: Mutex<bool>,
    cond: Condvar,
}

impl ShutdownSignal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn raise(&self) {
        *self.raised.lock() = true;
        self.cond.notify_all();
    }

    pub(crate) fn is_raised(&self) -> bool {
        *self.raised.lock()
    }

    /// Sleeps for `timeout` or until raised. Returns true if raised.
    pub(crate) fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut raised = self.raised.lock();
        while !*raised {
            if self.cond.wait_until(&mut raised, deadline).timed_out() {
                break;
            }
        }
        *raised
    }
}
