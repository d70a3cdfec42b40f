//! Linux `epoll`-based poller implementation.
//!
//! This is the Linux backend for the fibrio reactor. It is functionally
//! equivalent to the macOS `kqueue` poller and exposes the same
//! interface.
//!
//! Responsibilities:
//! - Register file descriptors with read/write interests
//! - Block waiting for I/O readiness
//! - Wake the reactor when jobs are injected from other threads
//! - Support timer-driven wakeups via poll timeouts

use super::common::{Interest, Waker};
use crate::reactor::event::Event;

use libc::{
    EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLLERR, EPOLLHUP, EPOLLIN, EPOLLOUT,
    epoll_create1, epoll_ctl, epoll_event, epoll_wait,
};
use std::io;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Duration;

/// Reserved token used internally for the wake-up event.
///
/// This value must never collide with tokens produced by the slab.
/// Using `u64::MAX` guarantees uniqueness.
const WAKE_TOKEN: u64 = u64::MAX;

/// Linux `epoll` poller.
///
/// This poller owns:
/// - an `epoll` instance,
/// - an internal `eventfd` used as a wake-up signal,
/// - a reusable event buffer.
///
/// The wake-up mechanism allows other threads (remote handles) to
/// interrupt a blocking `epoll_wait()` call.
pub(crate) struct EpollPoller {
    /// Epoll file descriptor.
    epoll: RawFd,

    /// Reusable buffer for epoll events.
    events: Vec<epoll_event>,

    /// Waker wrapping the internal eventfd.
    waker: Arc<Waker>,
}

impl Waker {
    /// Wake the poller.
    ///
    /// This writes to the internal `eventfd`, causing `epoll_wait`
    /// to return immediately.
    pub(crate) fn wake(&self) {
        let buf: u64 = 1;
        unsafe {
            libc::write(self.0, &buf as *const _ as *const _, 8);
        }
    }

    /// Reset the eventfd counter once a wake-up has been observed.
    fn drain(&self) {
        let mut buf = 0u64;
        unsafe {
            libc::read(self.0, &mut buf as *mut _ as *mut _, 8);
        }
    }
}

impl EpollPoller {
    /// Create a new `EpollPoller`.
    ///
    /// This creates the epoll instance and a non-blocking `eventfd`,
    /// and registers the eventfd into epoll as a persistent wake
    /// source.
    pub(crate) fn new() -> io::Result<Self> {
        let epoll = unsafe { epoll_create1(EPOLL_CLOEXEC) };
        if epoll < 0 {
            return Err(io::Error::last_os_error());
        }

        let eventfd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if eventfd < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(epoll) };
            return Err(err);
        }

        let mut event = epoll_event {
            events: EPOLLIN as u32,
            u64: WAKE_TOKEN,
        };

        let rc = unsafe { epoll_ctl(epoll, EPOLL_CTL_ADD, eventfd, &mut event) };
        if rc != 0 {
            let err = io::Error::last_os_error();
            unsafe {
                libc::close(eventfd);
                libc::close(epoll);
            }
            return Err(err);
        }

        Ok(Self {
            epoll,
            events: Vec::with_capacity(64),
            waker: Arc::new(Waker(eventfd)),
        })
    }

    /// Return the poller waker.
    ///
    /// The reactor hands this to remote handles so they can interrupt
    /// `epoll_wait` when jobs arrive from other threads.
    pub(crate) fn waker(&self) -> Arc<Waker> {
        self.waker.clone()
    }

    /// Register a file descriptor with the poller.
    ///
    /// The token is the slab index of the reactor's pending wait; it
    /// comes back verbatim in the readiness event.
    pub(crate) fn register(&self, fd: RawFd, token: usize, interest: Interest) {
        let mut event = epoll_event {
            events: interest_bits(interest),
            u64: token as u64,
        };

        let rc = unsafe { epoll_ctl(self.epoll, EPOLL_CTL_ADD, fd, &mut event) };
        debug_assert_eq!(rc, 0, "EPOLL_CTL_ADD failed for fd {fd}");
    }

    /// Remove a file descriptor from the poller.
    pub(crate) fn deregister(&self, fd: RawFd) {
        unsafe {
            epoll_ctl(self.epoll, EPOLL_CTL_DEL, fd, std::ptr::null_mut());
        }
    }

    /// Poll for I/O readiness events.
    ///
    /// Blocks until at least one file descriptor becomes ready, the
    /// wake event is triggered, or the optional timeout expires.
    pub(crate) fn poll(
        &mut self,
        events: &mut Vec<Event>,
        timeout: Option<Duration>,
    ) -> io::Result<()> {
        // Round up so a timer never fires before its deadline.
        let timeout_ms = match timeout {
            Some(t) => t.as_nanos().div_ceil(1_000_000).min(i32::MAX as u128) as i32,
            None => -1,
        };

        unsafe {
            self.events.set_len(self.events.capacity());
        }

        let n = unsafe {
            epoll_wait(
                self.epoll,
                self.events.as_mut_ptr(),
                self.events.capacity() as i32,
                timeout_ms,
            )
        };

        if n < 0 {
            let err = io::Error::last_os_error();
            unsafe {
                self.events.set_len(0);
            }
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }

        unsafe {
            self.events.set_len(n as usize);
        }

        // Each token names exactly one pending wait in the reactor's
        // slab, and epoll reports one event per registration, so the
        // readiness flags translate token by token. Errors and hangups
        // surface as readable; the woken fiber's retried syscall turns
        // them into a concrete io::Error.
        events.clear();
        events.extend(self.events.iter().filter_map(|ev| {
            if ev.u64 == WAKE_TOKEN {
                self.waker.drain();
                return None;
            }

            Some(Event {
                token: ev.u64 as usize,
                readable: ev.events & (EPOLLIN | EPOLLERR | EPOLLHUP) as u32 != 0,
                writable: ev.events & EPOLLOUT as u32 != 0,
            })
        }));

        Ok(())
    }
}

/// Translate reactor interests into epoll event bits.
fn interest_bits(interest: Interest) -> u32 {
    let mut bits = 0;

    if interest.read {
        bits |= EPOLLIN as u32;
    }
    if interest.write {
        bits |= EPOLLOUT as u32;
    }

    bits
}

impl Drop for EpollPoller {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epoll);
        }
    }
}
