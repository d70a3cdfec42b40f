//! Deadline timers.

use crate::adapter::{YieldToken, suspend_op};
use crate::reactor::TimerHandle;
use crate::stop::{StopMode, StopToken};
use crate::thread::ThreadContext;
use crate::Result;

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

/// A one-shot waitable timer.
///
/// Set an expiry with [`expires_after`](Timer::expires_after) or
/// [`expires_at`](Timer::expires_at), then [`wait`](Timer::wait) on it
/// from a fiber. Cancelling a timer completes a pending wait with
/// `Err(Aborted)`. A timer whose expiry was never set fires
/// immediately.
///
/// ```ignore
/// let timer = Timer::new();
/// while !ctx.stopped() {
///     timer.expires_after(Duration::from_secs(1));
///     timer.wait(Yield)?;
///     // tick
/// }
/// ```
pub struct Timer {
    ctx: Rc<ThreadContext>,
    deadline: Cell<Option<Instant>>,
    pending: RefCell<Option<TimerHandle>>,
}

impl Timer {
    /// Create a timer on the current thread context.
    ///
    /// # Panics
    ///
    /// Panics if no thread context is installed on this thread.
    pub fn new() -> Self {
        let ctx = crate::current_thread_context()
            .expect("no thread context installed on this thread");

        Self {
            ctx,
            deadline: Cell::new(None),
            pending: RefCell::new(None),
        }
    }

    /// Arm the timer to expire `timeout` from now.
    pub fn expires_after(&self, timeout: Duration) {
        self.deadline.set(Some(Instant::now() + timeout));
    }

    /// Arm the timer to expire at `deadline`.
    pub fn expires_at(&self, deadline: Instant) {
        self.deadline.set(Some(deadline));
    }

    /// Wait for the timer to expire.
    ///
    /// Completes with `Ok(())` at or after the expiry, `Err(Aborted)`
    /// if cancelled, or `Err(TimedOut)` if the token's own deadline
    /// passes first.
    pub fn wait<Y: YieldToken>(&self, token: Y) -> Result<()> {
        let deadline = self.deadline.get().unwrap_or_else(Instant::now);
        let reactor = self.ctx.reactor().clone();

        let result = suspend_op(&self.ctx, token, |completion, slot| {
            let handle =
                reactor.submit_timer(deadline, Box::new(move |result| completion.complete(result)));
            *self.pending.borrow_mut() = Some(handle.clone());

            let reactor = reactor.clone();
            slot.connect(move || reactor.cancel_timer(&handle));
        });

        self.pending.borrow_mut().take();
        result
    }

    /// Cancel a pending wait, completing it with `Err(Aborted)`.
    pub fn cancel(&self) {
        if let Some(handle) = self.pending.borrow_mut().take() {
            self.ctx.reactor().cancel_timer(&handle);
        }
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl StopToken for Timer {
    fn stop(&self, _mode: StopMode) -> bool {
        self.cancel();
        true
    }
}
