//! The scheduler algorithm.
//!
//! One scheduler exists per thread context. It satisfies the fiber
//! layer's pluggable-scheduler contract (`awakened`, `pick_next`,
//! `has_ready`, `suspend_until`, `notify`) while cooperating with the
//! reactor that runs inside the same OS thread.
//!
//! Worker fibers ready to run sit in a FIFO queue; the main fiber uses
//! a one-slot field because the reactor must be allowed to preempt it
//! at specific points. The dispatcher of the original design is the
//! native thread itself, running [`Scheduler::dispatch`]: resume every
//! ready fiber, then hand the thread to the reactor for exactly one
//! event. That single hand-off point is the only place the OS thread
//! blocks, which is what makes the await handshake race-free without
//! locks.

use super::{FiberCell, FiberId, FiberKind, STACK_SIZE, run_fiber_body, set_active};
use crate::reactor::Reactor;
use crate::utils::Slab;

use generator::Gn;

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Instant;

pub(crate) struct Scheduler {
    reactor: Rc<Reactor>,

    /// All live fibers on this thread.
    fibers: RefCell<Slab<Rc<FiberCell>>>,

    /// Number of live fibers.
    live: Cell<usize>,

    /// Ready worker fibers, in `awakened` order.
    ready: RefCell<VecDeque<FiberId>>,

    /// The main fiber, while alive.
    main_id: Cell<Option<FiberId>>,

    /// One-slot ready flag for the main fiber.
    main_slot: Cell<bool>,

    /// Whether the main fiber got its one-shot resume after the
    /// reactor stopped.
    main_stop_resumed: Cell<bool>,
}

impl Scheduler {
    pub(crate) fn new(reactor: Rc<Reactor>) -> Self {
        Self {
            reactor,
            fibers: RefCell::new(Slab::new(8)),
            live: Cell::new(0),
            ready: RefCell::new(VecDeque::new()),
            main_id: Cell::new(None),
            main_slot: Cell::new(false),
            main_stop_resumed: Cell::new(false),
        }
    }

    pub(crate) fn spawn_worker(&self, f: Box<dyn FnOnce()>) -> FiberId {
        self.spawn_fiber(FiberKind::Worker, f)
    }

    /// Register the entry function as the main fiber.
    ///
    /// The main fiber is the one `pick_next` resumes once after the
    /// reactor stops, so the entry function can observe the shutdown
    /// and return.
    pub(crate) fn spawn_main(&self, f: Box<dyn FnOnce()>) -> FiberId {
        debug_assert!(
            self.main_id
                .get()
                .is_none_or(|id| !self.fibers.borrow().contains(id)),
            "a main fiber is already running"
        );

        let id = self.spawn_fiber(FiberKind::Main, f);
        self.main_id.set(Some(id));
        self.main_stop_resumed.set(false);
        id
    }

    fn spawn_fiber(&self, kind: FiberKind, f: Box<dyn FnOnce()>) -> FiberId {
        let cell = Rc::new(FiberCell {
            kind,
            gen: RefCell::new(None),
            linked: Cell::new(false),
        });

        let mut gen = Gn::<()>::new_scoped_opt_local(STACK_SIZE, move |_scope| run_fiber_body(f));
        // co_yield_with suspends the innermost context marked with local
        // data; unmarked generators are invisible to it.
        gen.set_local_data(Rc::as_ptr(&cell) as *mut u8);
        *cell.gen.borrow_mut() = Some(gen);

        let id = self.fibers.borrow_mut().insert(cell);
        self.live.set(self.live.get() + 1);
        self.awakened(id);

        tracing::trace!(fiber = id, ?kind, "fiber spawned");
        id
    }

    /// Mark a fiber ready.
    ///
    /// Precondition: the fiber is not already linked. A double link
    /// corrupts the ready queue, so it is fatal.
    pub(crate) fn awakened(&self, id: FiberId) {
        let fiber = self
            .fibers
            .borrow()
            .get(id)
            .cloned()
            .expect("awakened an unknown fiber");

        assert!(!fiber.linked.get(), "fiber {id} is already linked");
        fiber.linked.set(true);

        match fiber.kind {
            FiberKind::Worker => self.ready.borrow_mut().push_back(id),
            FiberKind::Main => self.main_slot.set(true),
        }
    }

    /// Completion-side wake. Unlike [`awakened`](Self::awakened) it
    /// tolerates fibers that were already retired: a cancellation burst
    /// during teardown may complete operations whose fiber is gone.
    pub(crate) fn schedule(&self, id: FiberId) {
        if self.fibers.borrow().contains(id) {
            self.awakened(id);
        } else {
            tracing::trace!(fiber = id, "wake for a retired fiber dropped");
        }
    }

    /// Next fiber to resume: ready workers in FIFO order, then the main
    /// slot, then, once the reactor has stopped, the main fiber one
    /// last time so the entry function can exit cleanly.
    pub(crate) fn pick_next(&self) -> Option<FiberId> {
        if let Some(id) = self.ready.borrow_mut().pop_front() {
            self.unlink(id);
            return Some(id);
        }

        if self.main_slot.replace(false) {
            let id = self.main_id.get().expect("main slot set without a main fiber");
            self.unlink(id);
            return Some(id);
        }

        if self.reactor.stopped() && !self.main_stop_resumed.get() {
            if let Some(id) = self.main_id.get() {
                if self.fibers.borrow().contains(id) {
                    self.main_stop_resumed.set(true);
                    return Some(id);
                }
            }
        }

        None
    }

    pub(crate) fn has_ready(&self) -> bool {
        !self.ready.borrow().is_empty()
    }

    /// Hand the thread to the reactor for one event. This is the single
    /// point where the OS thread blocks.
    pub(crate) fn suspend_until(&self, deadline: Option<Instant>) -> bool {
        self.reactor.run_one_until(deadline)
    }

    /// Break an in-progress `suspend_until` by posting a no-op job.
    pub(crate) fn notify(&self) {
        self.reactor.post(|| {});
    }

    fn unlink(&self, id: FiberId) {
        if let Some(fiber) = self.fibers.borrow().get(id) {
            fiber.linked.set(false);
        }
    }

    /// Resume a fiber until it suspends or finishes.
    fn resume(&self, id: FiberId) {
        let Some(fiber) = self.fibers.borrow().get(id).cloned() else {
            return;
        };

        set_active(Some(id));
        {
            let mut gen = fiber.gen.borrow_mut();
            if let Some(gen) = gen.as_mut() {
                gen.resume();
            }
        }
        set_active(None);

        let done = fiber
            .gen
            .borrow()
            .as_ref()
            .is_none_or(|gen| gen.is_done());
        if done {
            self.retire(id);
        }
    }

    fn retire(&self, id: FiberId) {
        if let Some(fiber) = self.fibers.borrow_mut().try_remove(id) {
            self.live.set(self.live.get() - 1);
            debug_assert!(!fiber.linked.get(), "retiring a linked fiber");
            tracing::trace!(fiber = id, "fiber finished");
        }
    }

    /// Drive fibers and the reactor until every fiber has finished.
    ///
    /// When the reactor reports it can make no further progress and no
    /// fiber is ready, the remaining fibers can never wake; they are
    /// abandoned here and reclaimed when the guard drops.
    pub(crate) fn dispatch(&self) {
        loop {
            while let Some(id) = self.pick_next() {
                self.resume(id);
            }

            if self.live.get() == 0 {
                break;
            }

            if !self.suspend_until(None)
                && !self.has_ready()
                && !self.main_slot.get()
                && !self.main_resume_pending()
            {
                tracing::warn!(
                    live = self.live.get(),
                    "reactor out of work with suspended fibers; abandoning them"
                );
                break;
            }
        }
    }

    fn main_resume_pending(&self) -> bool {
        self.reactor.stopped()
            && !self.main_stop_resumed.get()
            && self
                .main_id
                .get()
                .is_some_and(|id| self.fibers.borrow().contains(id))
    }

    /// Drop every remaining fiber, unwinding their suspended stacks.
    pub(crate) fn purge(&self) {
        let ids: Vec<FiberId> = self.fibers.borrow().iter().map(|(id, _)| id).collect();

        for id in ids {
            let fiber = self.fibers.borrow_mut().try_remove(id);
            if let Some(fiber) = fiber {
                self.live.set(self.live.get() - 1);
                // Dropping a suspended generator cancels it, running the
                // destructors left on its stack.
                let gen = fiber.gen.borrow_mut().take();
                drop(gen);
            }
        }

        self.ready.borrow_mut().clear();
        self.main_slot.set(false);
    }
}

#[cfg(test)]
mod tests {
    use crate::reactor::WorkGuard;
    use crate::thread::ThreadContext;

    use std::time::{Duration, Instant};

    #[test]
    fn notify_breaks_a_blocking_pump() {
        let ctx = ThreadContext::new().unwrap();
        let _work = WorkGuard::new(ctx.reactor());

        ctx.scheduler().notify();
        assert!(ctx.reactor().run_one_until(None));

        // Without a pending notification the pump waits out the deadline.
        let deadline = Instant::now() + Duration::from_millis(20);
        assert!(!ctx.reactor().run_one_until(Some(deadline)));
        assert!(Instant::now() >= deadline);
    }

    #[test]
    fn ready_workers_are_picked_in_awakened_order() {
        let ctx = ThreadContext::new().unwrap();
        let sched = ctx.scheduler();

        let first = sched.spawn_worker(Box::new(|| {}));
        let second = sched.spawn_worker(Box::new(|| {}));
        let third = sched.spawn_worker(Box::new(|| {}));

        assert!(sched.has_ready());
        assert_eq!(sched.pick_next(), Some(first));
        assert_eq!(sched.pick_next(), Some(second));
        assert_eq!(sched.pick_next(), Some(third));
        assert_eq!(sched.pick_next(), None);

        ctx.scheduler().purge();
    }

    #[test]
    #[should_panic(expected = "already linked")]
    fn double_link_is_fatal() {
        let ctx = ThreadContext::new().unwrap();
        let sched = ctx.scheduler();

        let id = sched.spawn_worker(Box::new(|| {}));
        sched.awakened(id);
    }
}
