//! Stackful fibers.
//!
//! Each fiber owns its execution stack (a local generator) and suspends
//! at await points without unwinding. Fibers are resumed only by the
//! scheduler's dispatch loop on the thread that created them; there is
//! no migration between threads.

pub(crate) mod scheduler;

use generator::LocalGenerator;

use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};

/// Stack size of a fiber, in words (256 KiB on 64-bit targets).
pub(crate) const STACK_SIZE: usize = 0x8000;

/// Identifier of a fiber within its scheduler.
pub(crate) type FiberId = usize;

/// Role of a fiber. Only workers enter the ready FIFO; the main fiber
/// uses the scheduler's one-slot field.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum FiberKind {
    Worker,
    Main,
}

/// A fiber as stored by the scheduler.
pub(crate) struct FiberCell {
    pub(crate) kind: FiberKind,

    /// The suspended stack. Taken out for teardown.
    pub(crate) gen: RefCell<Option<LocalGenerator<'static, (), ()>>>,

    /// Whether the fiber is currently linked into the ready queue or
    /// the main slot. A fiber must never be linked twice.
    pub(crate) linked: Cell<bool>,
}

thread_local! {
    /// The fiber currently executing on this thread, if any.
    static ACTIVE_FIBER: Cell<Option<FiberId>> = const { Cell::new(None) };
}

/// Identifier of the fiber running on the current thread.
pub(crate) fn active() -> Option<FiberId> {
    ACTIVE_FIBER.get()
}

pub(crate) fn set_active(id: Option<FiberId>) {
    ACTIVE_FIBER.set(id);
}

/// Suspend the current fiber, returning control to the dispatch loop.
///
/// The fiber resumes when the scheduler picks it again after a wake.
/// Wakes can be spurious; callers re-check their condition in a loop.
pub(crate) fn suspend() {
    debug_assert!(active().is_some(), "suspend outside of a fiber");
    generator::co_yield_with(());
}

/// Runs a fiber body, containing panics.
///
/// User panics are caught and logged: fibers are detached, there is no
/// join handle to carry the payload. The generator crate's own control
/// panics (cancel on drop, stack errors) must keep unwinding or the
/// suspended stack would not be torn down.
pub(crate) fn run_fiber_body(f: Box<dyn FnOnce()>) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
        if payload.downcast_ref::<generator::Error>().is_some() {
            panic::resume_unwind(payload);
        }

        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        tracing::error!(%message, "fiber panicked");
    }
}

/// Start a new detached worker fiber on the current thread context.
///
/// The fiber runs `f` to completion, suspending at await points. It is
/// scheduled behind already-ready fibers and will not run before the
/// caller reaches its next suspension point.
///
/// # Panics
///
/// Panics if no thread context is installed on this thread.
pub fn spawn<F>(f: F)
where
    F: FnOnce() + 'static,
{
    let ctx = crate::current_thread_context()
        .expect("spawn called outside of a thread context");
    ctx.scheduler().spawn_worker(Box::new(f));
}

/// Reschedule the current fiber behind other ready fibers.
///
/// A no-op when called outside a fiber.
pub fn yield_now() {
    if let Some(id) = active() {
        let ctx = crate::current_thread_context()
            .expect("fiber running without a thread context");
        ctx.scheduler().awakened(id);
        suspend();
    }
}
