//! The await adapter.
//!
//! Converts a reactor-style operation, one that takes a completion
//! callback, into a direct call that suspends the fiber and returns a
//! [`Result`]. The token passed to the operation selects between a
//! plain wait ([`Yield`]) and a deadline-bound wait ([`TimedYield`]).
//!
//! The handshake between the awaiting fiber and the completion is a
//! pair of flags on shared single-threaded state:
//!
//! - the fiber sets `waiting` before it suspends and clears it as soon
//!   as it is back on its own stack;
//! - the completion sets `done`, records the value, and schedules the
//!   fiber only if `waiting` is still set.
//!
//! Both sides run on the one thread that owns the reactor, so there is
//! no window in which the flags can be observed half-updated, and
//! neither side can miss the other: if the completion lands before the
//! fiber suspends, the fiber re-checks `done` and never yields; if it
//! lands after, the fiber is in the queue and the resume is pending.

use crate::fiber;
use crate::reactor::Interest;
use crate::thread::ThreadContext;
use crate::{Error, Result};

use std::cell::RefCell;
use std::os::fd::RawFd;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

/// Completion token for awaited operations.
///
/// Implemented by [`Yield`] and [`TimedYield`]; operations accept any
/// token and stay agnostic of whether a deadline applies.
pub trait YieldToken: Copy {
    /// Deadline of the wait, if any.
    fn deadline(&self) -> Option<Instant>;
}

/// Plain completion token: wait until the operation finishes.
#[derive(Clone, Copy, Debug, Default)]
pub struct Yield;

impl YieldToken for Yield {
    fn deadline(&self) -> Option<Instant> {
        None
    }
}

/// Deadline-bound completion token.
///
/// If the operation does not finish by the deadline, it is cancelled
/// and the await returns [`Error::TimedOut`], even when the cancelled
/// operation reports some other error on its way out.
#[derive(Clone, Copy, Debug)]
pub struct TimedYield {
    deadline: Instant,
}

impl TimedYield {
    /// Token expiring `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
        }
    }

    /// Token expiring at `deadline`.
    pub fn at(deadline: Instant) -> Self {
        Self { deadline }
    }
}

impl YieldToken for TimedYield {
    fn deadline(&self) -> Option<Instant> {
        Some(self.deadline)
    }
}

/// Per-call await state, shared between the suspended fiber and the
/// completion callback.
struct AwaitState<T> {
    fiber: fiber::FiberId,
    value: Option<Result<T>>,
    done: bool,
    waiting: bool,
    timed_out: bool,
}

/// Completion handle handed to the wrapped operation.
///
/// Consumed by [`complete`](Self::complete); an operation finishes
/// exactly once.
pub(crate) struct OpCompletion<T> {
    state: Rc<RefCell<AwaitState<T>>>,
    ctx: Weak<ThreadContext>,
}

impl<T> OpCompletion<T> {
    pub(crate) fn complete(self, result: Result<T>) {
        let wake = {
            let mut state = self.state.borrow_mut();
            assert!(!state.done, "operation completed twice");

            state.value = Some(if state.timed_out {
                Err(Error::TimedOut)
            } else {
                result
            });
            state.done = true;

            state.waiting.then_some(state.fiber)
        };

        if let (Some(id), Some(ctx)) = (wake, self.ctx.upgrade()) {
            ctx.scheduler().schedule(id);
        }
    }
}

/// One-shot cancellation channel threaded into timed operations.
///
/// The operation connects a canceller into the slot; emitting the
/// signal fires it once. The cancelled operation is expected to
/// complete promptly with an aborted error.
pub(crate) struct CancelSignal {
    handler: Rc<RefCell<Option<Box<dyn FnOnce()>>>>,
}

pub(crate) struct CancelSlot {
    handler: Rc<RefCell<Option<Box<dyn FnOnce()>>>>,
}

impl CancelSignal {
    fn new() -> Self {
        Self {
            handler: Rc::new(RefCell::new(None)),
        }
    }

    fn slot(&self) -> CancelSlot {
        CancelSlot {
            handler: self.handler.clone(),
        }
    }

    fn emit(&self) {
        let handler = self.handler.borrow_mut().take();
        if let Some(handler) = handler {
            handler();
        }
    }
}

impl CancelSlot {
    pub(crate) fn connect(&self, canceller: impl FnOnce() + 'static) {
        *self.handler.borrow_mut() = Some(Box::new(canceller));
    }
}

/// Await a wrapped operation.
///
/// `start` must begin the operation and register the completion; it
/// runs synchronously and must not block. The calling fiber then waits
/// until the completion fires, honouring the token's deadline.
///
/// # Panics
///
/// Panics when called outside a fiber.
pub(crate) fn suspend_op<T, Y, S>(ctx: &Rc<ThreadContext>, token: Y, start: S) -> Result<T>
where
    Y: YieldToken,
    S: FnOnce(OpCompletion<T>, CancelSlot),
{
    let id = fiber::active().expect("awaited an operation outside of a fiber");

    let state = Rc::new(RefCell::new(AwaitState {
        fiber: id,
        value: None,
        done: false,
        waiting: false,
        timed_out: false,
    }));

    let signal = CancelSignal::new();
    start(
        OpCompletion {
            state: state.clone(),
            ctx: Rc::downgrade(ctx),
        },
        signal.slot(),
    );

    loop {
        if state.borrow().done {
            break;
        }

        state.borrow_mut().waiting = true;

        match token.deadline() {
            Some(deadline) if !state.borrow().timed_out => {
                ctx.wait_until(deadline);
                state.borrow_mut().waiting = false;

                if state.borrow().done {
                    break;
                }

                // Deadline missed: cancel the operation and keep
                // waiting for its (now aborted) completion.
                state.borrow_mut().timed_out = true;
                signal.emit();
            }
            _ => {
                fiber::suspend();
                state.borrow_mut().waiting = false;
            }
        }
    }

    let value = state.borrow_mut().value.take();
    value.expect("await finished without a value")
}

/// Await readiness of `fd`, completing early with `Err(Aborted)` if the
/// wait is cancelled or the descriptor's resource is closed.
pub(crate) fn wait_ready<Y: YieldToken>(
    ctx: &Rc<ThreadContext>,
    fd: RawFd,
    interest: Interest,
    token: Y,
) -> Result<()> {
    suspend_op(ctx, token, |completion, slot| {
        let reactor = ctx.reactor().clone();
        let key = reactor.submit_io(fd, interest, Box::new(move |result| completion.complete(result)));

        let reactor = ctx.reactor().clone();
        slot.connect(move || reactor.cancel_io(key));
    })
}
