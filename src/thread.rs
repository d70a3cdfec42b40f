//! Thread contexts and guards.
//!
//! A [`ThreadContext`] is the composite a fiber program runs on: one
//! reactor, one stop source and one scheduler, owned by one OS thread.
//! A [`ThreadGuard`] installs the context as the thread-local current
//! context, runs an entry function as the main fiber, and drives the
//! dispatch loop until every fiber has finished. A [`ThreadGroup`]
//! owns several such threads and can broadcast jobs or shut them all
//! down.
//!
//! Threads never share fibers. The only cross-thread channel is
//! [`Remote`], which injects jobs into another thread's reactor.

use crate::fiber::scheduler::Scheduler;
use crate::reactor::{Reactor, Shared, WorkGuard};
use crate::stop::{StopMode, StopSource};

use std::cell::RefCell;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

thread_local! {
    /// The context installed by the innermost guard on this thread.
    static CURRENT_CONTEXT: RefCell<Option<Rc<ThreadContext>>> = const { RefCell::new(None) };
}

/// Returns the thread context installed on this thread, if any.
pub fn current_thread_context() -> Option<Rc<ThreadContext>> {
    CURRENT_CONTEXT.with(|current| current.borrow().clone())
}

/// Per-thread runtime state: reactor, stop source and scheduler.
pub struct ThreadContext {
    reactor: Rc<Reactor>,
    sched: Scheduler,
    stop_source: StopSource,
}

impl ThreadContext {
    pub(crate) fn new() -> io::Result<Rc<Self>> {
        let reactor = Rc::new(Reactor::new()?);

        Ok(Rc::new(Self {
            sched: Scheduler::new(reactor.clone()),
            stop_source: StopSource::new(),
            reactor,
        }))
    }

    /// Whether the reactor has been stopped.
    pub fn stopped(&self) -> bool {
        self.reactor.stopped()
    }

    /// Request an orderly shutdown of this context.
    ///
    /// The request is dispatched as a reactor job so it is serialised
    /// with in-flight completions: on the next pump, every registered
    /// stop token is stopped (unblocking the fibers waiting on them)
    /// and then the reactor itself stops. Safe to call from any fiber
    /// on this thread; idempotent.
    pub fn stop(&self) {
        self.reactor.post(|| {
            if let Some(ctx) = current_thread_context() {
                ctx.stop_now();
            }
        });
    }

    /// Immediate shutdown: stop every token, then the reactor.
    pub(crate) fn stop_now(&self) {
        tracing::debug!("thread context stopping");
        self.stop_source.stop(StopMode::Force);
        self.reactor.stop();
    }

    /// The stop source resources register with.
    pub fn stop_source(&self) -> &StopSource {
        &self.stop_source
    }

    /// Cross-thread handle to this context.
    pub fn remote(&self) -> Remote {
        Remote {
            shared: self.reactor.shared(),
        }
    }

    pub(crate) fn scheduler(&self) -> &Scheduler {
        &self.sched
    }

    pub(crate) fn reactor(&self) -> &Rc<Reactor> {
        &self.reactor
    }

    /// Park the current fiber until `deadline`, or until something else
    /// schedules it. Used by timed awaits; the wake timer is discarded
    /// quietly when the fiber is woken early.
    pub(crate) fn wait_until(self: &Rc<Self>, deadline: Instant) {
        let Some(id) = crate::fiber::active() else {
            return;
        };

        let ctx = Rc::downgrade(self);
        let handle = self.reactor.submit_timer(
            deadline,
            Box::new(move |result| {
                if result.is_ok() {
                    if let Some(ctx) = ctx.upgrade() {
                        ctx.sched.schedule(id);
                    }
                }
            }),
        );

        crate::fiber::suspend();
        self.reactor.discard_timer(&handle);
    }
}

/// Scoped install of a context as the thread-local current context.
struct ContextScope {
    previous: Option<Rc<ThreadContext>>,
}

impl ContextScope {
    fn enter(ctx: Rc<ThreadContext>) -> Self {
        let previous = CURRENT_CONTEXT.with(|current| current.borrow_mut().replace(ctx));
        Self { previous }
    }
}

impl Drop for ContextScope {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT_CONTEXT.with(|current| *current.borrow_mut() = previous);
    }
}

/// Cross-thread handle to a [`ThreadContext`].
///
/// Jobs posted through a `Remote` run on the owning thread with the
/// context installed, interleaved with completions by the reactor.
#[derive(Clone)]
pub struct Remote {
    shared: Arc<Shared>,
}

impl Remote {
    /// Inject a job into the owning thread. Breaks a blocking pump.
    pub fn post<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.inject(Box::new(f));
    }

    /// Request shutdown of the owning thread's context.
    pub fn stop(&self) {
        self.post(|| {
            if let Some(ctx) = current_thread_context() {
                ctx.stop_now();
            }
        });
    }
}

/// Scoped owner of a [`ThreadContext`].
///
/// `run` executes an entry function as the main fiber and returns its
/// value once every fiber on the context has finished. Dropping the
/// guard stops the context and reclaims any fiber that survived it.
pub struct ThreadGuard {
    ctx: Rc<ThreadContext>,
}

impl ThreadGuard {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            ctx: ThreadContext::new()?,
        })
    }

    /// The guarded context.
    pub fn context(&self) -> &Rc<ThreadContext> {
        &self.ctx
    }

    /// Run `f` as the main fiber and drive the context until every
    /// fiber has finished.
    ///
    /// A reactor work guard is held for the duration of `f`, so the
    /// reactor does not report exhaustion while the entry function is
    /// still setting things up. Detached workers spawned by `f` keep
    /// running after it returns; `run` only comes back when the thread
    /// is idle.
    ///
    /// # Panics
    ///
    /// Re-raises a panic of the entry function, and panics if the
    /// context stops in a way that strands the main fiber forever.
    pub fn run<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&ThreadContext) -> R + 'static,
        R: 'static,
    {
        let ctx = self.ctx.clone();
        let _scope = ContextScope::enter(ctx.clone());

        let result: Rc<RefCell<Option<thread::Result<R>>>> = Rc::new(RefCell::new(None));

        let slot = result.clone();
        let work = WorkGuard::new(ctx.reactor());
        let main_ctx = ctx.clone();

        ctx.sched.spawn_main(Box::new(move || {
            let _work = work;
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(&main_ctx)));

            match outcome {
                Err(payload) if payload.downcast_ref::<generator::Error>().is_some() => {
                    // Keep the generator's own unwind (cancel, stack
                    // error) moving; it is not a user panic.
                    panic::resume_unwind(payload)
                }
                outcome => *slot.borrow_mut() = Some(outcome),
            }
        }));

        ctx.sched.dispatch();

        let outcome = result.borrow_mut().take();
        match outcome {
            Some(Ok(value)) => value,
            Some(Err(payload)) => panic::resume_unwind(payload),
            None => panic!("the thread context stopped before the entry function completed"),
        }
    }
}

impl Drop for ThreadGuard {
    fn drop(&mut self) {
        self.ctx.stop_now();
        self.ctx.sched.purge();
    }
}

/// A set of OS threads, each running one thread context.
pub struct ThreadGroup {
    threads: Vec<thread::JoinHandle<()>>,
    remotes: Vec<Remote>,
}

impl ThreadGroup {
    pub fn new() -> Self {
        Self {
            threads: Vec::new(),
            remotes: Vec::new(),
        }
    }

    /// Spawn a thread running `f` on a fresh thread context.
    pub fn add_thread<F>(&mut self, f: F)
    where
        F: FnOnce(&ThreadContext) + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();

        let handle = thread::spawn(move || {
            let guard = match ThreadGuard::new() {
                Ok(guard) => guard,
                Err(err) => {
                    tracing::error!(error = %err, "failed to create a thread context");
                    return;
                }
            };

            if tx.send(guard.context().remote()).is_err() {
                return;
            }

            guard.run(f);
        });

        match rx.recv() {
            Ok(remote) => {
                self.threads.push(handle);
                self.remotes.push(remote);
            }
            Err(_) => {
                let _ = handle.join();
            }
        }
    }

    /// Spawn `count` threads all running `f`.
    pub fn add_threads<F>(&mut self, count: usize, f: F)
    where
        F: Fn(&ThreadContext) + Clone + Send + 'static,
    {
        for _ in 0..count {
            self.add_thread(f.clone());
        }
    }

    /// Broadcast a job to every thread in the group.
    ///
    /// The job runs on each thread with that thread's context
    /// installed, within one reactor pump.
    pub fn post<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        for remote in &self.remotes {
            let f = f.clone();
            remote.post(move || f());
        }
    }

    /// Cross-thread handles to the group's contexts.
    pub fn remotes(&self) -> &[Remote] {
        &self.remotes
    }

    /// Ask every thread to stop and join them all.
    pub fn stop_all(&mut self) {
        for remote in &self.remotes {
            remote.stop();
        }
        self.join_all();
    }

    /// Join every thread without requesting a stop.
    pub fn join_all(&mut self) {
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
        self.remotes.clear();
    }
}

impl Default for ThreadGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ThreadGroup {
    fn drop(&mut self) {
        self.stop_all();
    }
}
