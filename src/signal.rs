//! Signal delivery for fibers.
//!
//! A [`SignalSet`] turns Unix signals into an awaitable stream using
//! the self-pipe pattern: a process-wide `sigaction` handler writes the
//! signal number into a non-blocking pipe, and the reactor watches the
//! read end like any other descriptor. That keeps signal handling on
//! the one async-signal-safe operation (`write`) and delivers signals
//! through the same completion path as every other operation.

use crate::adapter::{YieldToken, wait_ready};
use crate::reactor::Interest;
use crate::reactor::poller::platform::{sys_close, sys_pipe, sys_read};
use crate::stop::{StopMode, StopToken};
use crate::thread::ThreadContext;
use crate::{Error, Result};

use std::cell::Cell;
use std::io;
use std::mem;
use std::os::fd::RawFd;
use std::rc::Rc;
use std::slice;
use std::sync::atomic::{AtomicI32, Ordering};

/// Highest signal number a set may watch (exclusive).
const MAX_SIGNAL: usize = 32;

/// Write end of the pipe owning each signal number, or -1.
///
/// The handler reads this table, so entries must be updated atomically
/// and the handler must never take a lock.
static SIGNAL_PIPES: [AtomicI32; MAX_SIGNAL] = [const { AtomicI32::new(-1) }; MAX_SIGNAL];

extern "C" fn forward_signal(signo: libc::c_int) {
    if signo < 0 || signo as usize >= MAX_SIGNAL {
        return;
    }

    let fd = SIGNAL_PIPES[signo as usize].load(Ordering::Relaxed);
    if fd >= 0 {
        let byte = signo as u8;
        unsafe {
            libc::write(fd, &byte as *const u8 as *const _, 1);
        }
    }
}

/// A set of Unix signals awaited as completions.
///
/// While the set is alive, its signals are redirected away from their
/// default action. [`wait`](SignalSet::wait) suspends the calling fiber
/// until one of the signals arrives and returns its number.
/// Cancelling the set aborts pending waits with `Err(Aborted)`; this is
/// how a stop broadcast unblocks a fiber parked on a signal wait.
/// Dropping the set restores the default actions.
///
/// Each signal number can be owned by one set per process at a time.
pub struct SignalSet {
    ctx: Rc<ThreadContext>,
    read_fd: RawFd,
    write_fd: RawFd,
    signals: Vec<i32>,
    closed: Cell<bool>,
}

impl SignalSet {
    /// Claim `signals` (e.g. `&[libc::SIGINT, libc::SIGTERM]`).
    ///
    /// Fails with `AlreadyExists` if another set owns one of them.
    ///
    /// # Panics
    ///
    /// Panics if no thread context is installed on this thread.
    pub fn new(signals: &[i32]) -> Result<Self> {
        let ctx = crate::current_thread_context()
            .expect("no thread context installed on this thread");

        let (read_fd, write_fd) = sys_pipe()?;

        let mut set = Self {
            ctx,
            read_fd,
            write_fd,
            signals: Vec::with_capacity(signals.len()),
            closed: Cell::new(false),
        };

        for &signo in signals {
            // Failure drops `set`, releasing what was claimed so far.
            set.claim(signo)?;
        }

        Ok(set)
    }

    fn claim(&mut self, signo: i32) -> Result<()> {
        if !(1..MAX_SIGNAL as i32).contains(&signo) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "signal number out of range",
            )
            .into());
        }

        SIGNAL_PIPES[signo as usize]
            .compare_exchange(-1, self.write_fd, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    "signal already owned by another set",
                )
            })?;

        let mut action: libc::sigaction = unsafe { mem::zeroed() };
        action.sa_sigaction = forward_signal as extern "C" fn(libc::c_int) as usize;
        action.sa_flags = libc::SA_RESTART;
        unsafe {
            libc::sigemptyset(&mut action.sa_mask);
        }

        let rc = unsafe { libc::sigaction(signo, &action, std::ptr::null_mut()) };
        if rc != 0 {
            SIGNAL_PIPES[signo as usize].store(-1, Ordering::Release);
            return Err(io::Error::last_os_error().into());
        }

        self.signals.push(signo);
        tracing::debug!(signal = signo, "signal claimed");
        Ok(())
    }

    /// Wait for one of the set's signals; returns its number.
    pub fn wait<Y: YieldToken>(&self, token: Y) -> Result<i32> {
        loop {
            if self.closed.get() {
                return Err(Error::Aborted);
            }

            let mut byte = 0u8;
            let n = sys_read(self.read_fd, slice::from_mut(&mut byte));
            if n == 1 {
                return Ok(byte as i32);
            }
            if n == 0 {
                return Err(Error::Aborted);
            }

            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::WouldBlock => {
                    wait_ready(&self.ctx, self.read_fd, Interest::READ, token)?;
                }
                io::ErrorKind::Interrupted => {}
                _ => return Err(err.into()),
            }
        }
    }

    /// Abort pending waits with `Err(Aborted)`. The set stays usable.
    pub fn cancel(&self) {
        self.ctx.reactor().abort_fd(self.read_fd);
    }

    /// Restore default actions and release the pipe. Idempotent.
    pub fn close(&self) {
        if self.closed.replace(true) {
            return;
        }

        for &signo in &self.signals {
            let mut action: libc::sigaction = unsafe { mem::zeroed() };
            action.sa_sigaction = libc::SIG_DFL;
            unsafe {
                libc::sigemptyset(&mut action.sa_mask);
                libc::sigaction(signo, &action, std::ptr::null_mut());
            }
            SIGNAL_PIPES[signo as usize].store(-1, Ordering::Release);
        }

        self.ctx.reactor().abort_fd(self.read_fd);
        sys_close(self.read_fd);
        sys_close(self.write_fd);
    }
}

impl StopToken for SignalSet {
    fn stop(&self, _mode: StopMode) -> bool {
        self.cancel();
        true
    }
}

impl Drop for SignalSet {
    fn drop(&mut self) {
        self.close();
    }
}
