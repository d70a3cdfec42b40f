//! Single-threaded reactor.
//!
//! The reactor multiplexes readiness events, deadline timers and posted
//! jobs behind the three-call interface the scheduler needs: `post`,
//! `run_one_until` and `stopped`. It runs inline on the thread that owns
//! it (`run_one_until` is invoked from the scheduler's `suspend_until`,
//! never from a dedicated reactor thread), so completion callbacks are
//! always delivered on the thread that owns the suspended fiber.
//!
//! `run_one_until` executes at most **one** ready job per call. Readiness
//! events and due timers are first converted into jobs, then drained one
//! at a time, which keeps the interleaving of completions and fiber
//! resumptions fair.

mod event;
mod io;
mod timer;

pub(crate) mod poller;

use event::Event;
use io::IoEntry;
use poller::{Poller, Waker};
use timer::{TimerEntry, TimerState};

pub(crate) use io::IoCallback;
pub(crate) use poller::Interest;
pub(crate) use timer::TimerHandle;

use crate::Error;
use crate::utils::Slab;

use std::cell::{Cell, RefCell};
use std::collections::{BinaryHeap, VecDeque};
use std::os::fd::RawFd;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// A unit of work queued on the reactor.
type Job = Box<dyn FnOnce()>;

/// A unit of work injected from another thread.
pub(crate) type RemoteJob = Box<dyn FnOnce() + Send>;

/// Cross-thread side of the reactor: an injection queue plus the poller
/// waker that breaks a blocking poll when a job arrives.
pub(crate) struct Shared {
    injected: Mutex<VecDeque<RemoteJob>>,
    waker: Arc<Waker>,
}

impl Shared {
    /// Queue a job for the owning thread and wake its poller.
    pub(crate) fn inject(&self, job: RemoteJob) {
        self.injected
            .lock()
            .expect("reactor injection queue poisoned")
            .push_back(job);
        self.waker.wake();
    }

    fn is_empty(&self) -> bool {
        self.injected
            .lock()
            .expect("reactor injection queue poisoned")
            .is_empty()
    }
}

pub(crate) struct Reactor {
    poller: RefCell<Poller>,

    /// Scratch buffer reused across polls.
    events: RefCell<Vec<Event>>,

    /// Pending readiness operations; the slab index is the poller token.
    ios: RefCell<Slab<IoEntry>>,

    /// Pending timers, earliest deadline first.
    timers: RefCell<BinaryHeap<TimerEntry>>,

    /// Number of timers that still hold a callback.
    armed_timers: Cell<usize>,

    /// Jobs ready to run, in post order.
    jobs: RefCell<VecDeque<Job>>,

    /// Outstanding work guards.
    work: Cell<usize>,

    stopped: Cell<bool>,

    shared: Arc<Shared>,
}

impl Reactor {
    pub(crate) fn new() -> std::io::Result<Self> {
        let poller = Poller::new()?;
        let shared = Arc::new(Shared {
            injected: Mutex::new(VecDeque::new()),
            waker: poller.waker(),
        });

        Ok(Self {
            poller: RefCell::new(poller),
            events: RefCell::new(Vec::new()),
            ios: RefCell::new(Slab::new(16)),
            timers: RefCell::new(BinaryHeap::new()),
            armed_timers: Cell::new(0),
            jobs: RefCell::new(VecDeque::new()),
            work: Cell::new(0),
            stopped: Cell::new(false),
            shared,
        })
    }

    /// Handle for cross-thread job injection.
    pub(crate) fn shared(&self) -> Arc<Shared> {
        self.shared.clone()
    }

    /// Queue a job to run on the owning thread.
    pub(crate) fn post(&self, job: impl FnOnce() + 'static) {
        self.jobs.borrow_mut().push_back(Box::new(job));
    }

    /// Stop the reactor. Subsequent pumps return immediately without
    /// running anything. Idempotent.
    pub(crate) fn stop(&self) {
        if !self.stopped.replace(true) {
            tracing::debug!("reactor stopped");
        }
    }

    pub(crate) fn stopped(&self) -> bool {
        self.stopped.get()
    }

    pub(crate) fn work_started(&self) {
        self.work.set(self.work.get() + 1);
    }

    pub(crate) fn work_finished(&self) {
        self.work.set(self.work.get() - 1);
    }

    /// Whether anything could still produce a job.
    fn has_work(&self) -> bool {
        !self.jobs.borrow().is_empty()
            || !self.ios.borrow().is_empty()
            || self.armed_timers.get() > 0
            || self.work.get() > 0
            || !self.shared.is_empty()
    }

    fn drain_injected(&self) {
        let mut injected = self
            .shared
            .injected
            .lock()
            .expect("reactor injection queue poisoned");
        let mut jobs = self.jobs.borrow_mut();
        while let Some(job) = injected.pop_front() {
            jobs.push_back(job);
        }
    }

    /// Run at most one ready job, blocking until one is available, the
    /// optional deadline passes, the reactor is stopped, or it runs out
    /// of work. Returns whether a job ran.
    pub(crate) fn run_one_until(&self, deadline: Option<Instant>) -> bool {
        loop {
            if self.stopped.get() {
                return false;
            }

            self.drain_injected();

            let job = self.jobs.borrow_mut().pop_front();
            if let Some(job) = job {
                job();
                return true;
            }

            if !self.has_work() {
                return false;
            }

            let now = Instant::now();
            if self.fire_due_timers(now) {
                continue;
            }

            let next_timer = self.timers.borrow().peek().map(|entry| entry.deadline);
            let wake_at = match (next_timer, deadline) {
                (Some(t), Some(d)) => Some(t.min(d)),
                (t, d) => t.or(d),
            };
            let timeout = wake_at.map(|at| at.saturating_duration_since(now));

            {
                let mut poller = self.poller.borrow_mut();
                let mut events = self.events.borrow_mut();
                if let Err(err) = poller.poll(&mut events, timeout) {
                    tracing::warn!(error = %err, "poller failure");
                    return false;
                }
            }

            self.complete_ready_ios();

            if self.jobs.borrow().is_empty() && self.shared.is_empty() {
                if let Some(d) = deadline {
                    if Instant::now() >= d {
                        return false;
                    }
                }
            }
        }
    }

    /// Move due timers into the job queue. Dead entries (cancelled or
    /// discarded) are dropped on the way. Returns whether any fired.
    fn fire_due_timers(&self, now: Instant) -> bool {
        let mut fired = false;

        let mut timers = self.timers.borrow_mut();
        loop {
            match timers.peek() {
                Some(entry) if !entry.state.is_armed() => {
                    timers.pop();
                }
                Some(entry) if entry.deadline <= now => {
                    let entry = timers.pop().expect("peeked timer entry vanished");
                    if let Some(callback) = self.disarm(&entry.state) {
                        self.jobs
                            .borrow_mut()
                            .push_back(Box::new(move || callback(Ok(()))));
                        fired = true;
                    }
                }
                _ => break,
            }
        }

        fired
    }

    /// Convert polled readiness events into completion jobs.
    fn complete_ready_ios(&self) {
        let events: Vec<Event> = self.events.borrow_mut().drain(..).collect();

        for event in events {
            let entry = self.ios.borrow_mut().try_remove(event.token);
            if let Some(entry) = entry {
                tracing::trace!(
                    fd = entry.fd,
                    token = event.token,
                    readable = event.readable,
                    writable = event.writable,
                    "readiness wait completed"
                );
                self.poller.borrow_mut().deregister(entry.fd);
                let callback = entry.callback;
                self.jobs
                    .borrow_mut()
                    .push_back(Box::new(move || callback(Ok(()))));
            }
        }
    }

    /// Register a readiness wait for `fd`. The callback fires with
    /// `Ok(())` on readiness or `Err(Aborted)` on cancellation.
    ///
    /// At most one wait per file descriptor may be outstanding; the
    /// resources in this crate never split interests across fibers.
    pub(crate) fn submit_io(&self, fd: RawFd, interest: Interest, callback: IoCallback) -> usize {
        debug_assert!(
            self.ios.borrow().iter().all(|(_, entry)| entry.fd != fd),
            "fd {fd} already has a pending wait"
        );

        let token = self.ios.borrow_mut().insert(IoEntry { fd, callback });
        self.poller.borrow_mut().register(fd, token, interest);
        token
    }

    /// Cancel a pending readiness wait, delivering `Err(Aborted)` to its
    /// completion inline. A no-op if the wait already completed.
    pub(crate) fn cancel_io(&self, token: usize) {
        let entry = self.ios.borrow_mut().try_remove(token);
        if let Some(entry) = entry {
            self.poller.borrow_mut().deregister(entry.fd);
            (entry.callback)(Err(Error::Aborted));
        }
    }

    /// Abort every pending wait on `fd`, delivering `Err(Aborted)`
    /// inline. Used by the close path of a resource.
    pub(crate) fn abort_fd(&self, fd: RawFd) {
        let tokens: Vec<usize> = self
            .ios
            .borrow()
            .iter()
            .filter(|(_, entry)| entry.fd == fd)
            .map(|(token, _)| token)
            .collect();

        for token in tokens {
            self.cancel_io(token);
        }
    }

    /// Schedule a timer. The callback fires with `Ok(())` at or after
    /// the deadline, or with `Err(Aborted)` if cancelled first.
    pub(crate) fn submit_timer(
        &self,
        deadline: Instant,
        callback: IoCallback,
    ) -> TimerHandle {
        let state = TimerState::new(callback);
        self.armed_timers.set(self.armed_timers.get() + 1);
        self.timers.borrow_mut().push(TimerEntry {
            deadline,
            state: state.clone(),
        });
        TimerHandle(state)
    }

    /// Cancel a timer, delivering `Err(Aborted)` to its completion
    /// inline. A no-op if the timer already fired.
    pub(crate) fn cancel_timer(&self, handle: &TimerHandle) {
        if let Some(callback) = self.disarm(&handle.0) {
            callback(Err(Error::Aborted));
        }
    }

    /// Drop a timer without delivering a completion. Used for internal
    /// deadline sleeps that were overtaken by the awaited operation.
    pub(crate) fn discard_timer(&self, handle: &TimerHandle) {
        let _ = self.disarm(&handle.0);
    }

    fn disarm(&self, state: &Rc<TimerState>) -> Option<IoCallback> {
        let callback = state.take();
        if callback.is_some() {
            self.armed_timers.set(self.armed_timers.get() - 1);
        }
        callback
    }
}

/// Keeps the reactor considered busy while alive, preventing
/// `run_one_until` from reporting work exhaustion.
pub(crate) struct WorkGuard {
    reactor: Rc<Reactor>,
}

impl WorkGuard {
    pub(crate) fn new(reactor: &Rc<Reactor>) -> Self {
        reactor.work_started();
        Self {
            reactor: reactor.clone(),
        }
    }
}

impl Drop for WorkGuard {
    fn drop(&mut self) {
        self.reactor.work_finished();
    }
}
