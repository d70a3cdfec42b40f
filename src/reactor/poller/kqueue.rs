//! macOS `kqueue`-based poller implementation.
//!
//! Functionally equivalent to the Linux `epoll` poller and exposes the
//! same interface to the reactor. The wake channel is a non-blocking
//! pipe whose read end is registered under a reserved token.

use super::common::{Interest, Waker};
use super::platform::sys_pipe;
use crate::reactor::event::Event;

use libc::{
    EV_ADD, EV_DELETE, EV_ENABLE, EVFILT_READ, EVFILT_WRITE, c_long, kevent, kqueue, time_t,
    timespec,
};
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Duration;
use std::{io, ptr};

/// Reserved token for the wake pipe; never produced by the slab.
const WAKE_TOKEN: usize = usize::MAX;

/// macOS `kqueue` poller.
pub(crate) struct KqueuePoller {
    /// Kqueue file descriptor.
    kqueue: RawFd,

    /// Reusable buffer for kevents.
    events: Vec<kevent>,

    /// Read end of the wake pipe, registered under `WAKE_TOKEN`.
    wake_read: RawFd,

    /// Waker wrapping the write end of the wake pipe.
    waker: Arc<Waker>,
}

impl Waker {
    /// Wake the poller by writing a byte into the wake pipe.
    pub(crate) fn wake(&self) {
        let buf = [1u8];
        unsafe {
            libc::write(self.0, buf.as_ptr() as *const _, 1);
        }
    }
}

impl KqueuePoller {
    /// Create a new `KqueuePoller` with its wake pipe registered.
    pub(crate) fn new() -> io::Result<Self> {
        let kq = unsafe { kqueue() };
        if kq < 0 {
            return Err(io::Error::last_os_error());
        }

        let (wake_read, wake_write) = match sys_pipe() {
            Ok(fds) => fds,
            Err(err) => {
                unsafe { libc::close(kq) };
                return Err(err);
            }
        };

        let event = kevent {
            ident: wake_read as usize,
            filter: EVFILT_READ,
            flags: EV_ADD | EV_ENABLE,
            fflags: 0,
            data: 0,
            udata: WAKE_TOKEN as *mut _,
        };

        let rc = unsafe { kevent(kq, &event, 1, ptr::null_mut(), 0, ptr::null()) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            unsafe {
                libc::close(wake_read);
                libc::close(wake_write);
                libc::close(kq);
            }
            return Err(err);
        }

        Ok(Self {
            kqueue: kq,
            events: Vec::with_capacity(64),
            wake_read,
            waker: Arc::new(Waker(wake_write)),
        })
    }

    /// Return the poller waker.
    pub(crate) fn waker(&self) -> Arc<Waker> {
        self.waker.clone()
    }

    /// Register a file descriptor with the poller.
    pub(crate) fn register(&self, fd: RawFd, token: usize, interest: Interest) {
        let mut changes = Vec::with_capacity(2);

        if interest.read {
            changes.push(kevent {
                ident: fd as usize,
                filter: EVFILT_READ,
                flags: EV_ADD | EV_ENABLE,
                fflags: 0,
                data: 0,
                udata: token as *mut _,
            });
        }

        if interest.write {
            changes.push(kevent {
                ident: fd as usize,
                filter: EVFILT_WRITE,
                flags: EV_ADD | EV_ENABLE,
                fflags: 0,
                data: 0,
                udata: token as *mut _,
            });
        }

        unsafe {
            kevent(
                self.kqueue,
                changes.as_ptr(),
                changes.len() as i32,
                ptr::null_mut(),
                0,
                ptr::null(),
            );
        }
    }

    /// Remove a file descriptor from the poller.
    pub(crate) fn deregister(&self, fd: RawFd) {
        let changes = [
            kevent {
                ident: fd as usize,
                filter: EVFILT_READ,
                flags: EV_DELETE,
                fflags: 0,
                data: 0,
                udata: ptr::null_mut(),
            },
            kevent {
                ident: fd as usize,
                filter: EVFILT_WRITE,
                flags: EV_DELETE,
                fflags: 0,
                data: 0,
                udata: ptr::null_mut(),
            },
        ];

        unsafe {
            kevent(
                self.kqueue,
                changes.as_ptr(),
                changes.len() as i32,
                ptr::null_mut(),
                0,
                ptr::null(),
            );
        }
    }

    /// Poll for I/O readiness events.
    pub(crate) fn poll(
        &mut self,
        events: &mut Vec<Event>,
        timeout: Option<Duration>,
    ) -> io::Result<()> {
        let ts;
        let timespec_ptr = match timeout {
            Some(t) => {
                ts = timespec {
                    tv_sec: t.as_secs() as time_t,
                    tv_nsec: t.subsec_nanos() as c_long,
                };
                &ts as *const timespec
            }
            None => ptr::null(),
        };

        unsafe {
            self.events.set_len(self.events.capacity());
        }

        let n = unsafe {
            kevent(
                self.kqueue,
                ptr::null(),
                0,
                self.events.as_mut_ptr(),
                self.events.capacity() as i32,
                timespec_ptr,
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
        // slab, and every wait registers a single filter, so readiness
        // translates token by token.
        events.clear();
        events.extend(self.events.iter().filter_map(|ev| {
            let token = ev.udata as usize;

            if token == WAKE_TOKEN {
                self.drain_wake_pipe();
                return None;
            }

            Some(Event {
                token,
                readable: ev.filter == EVFILT_READ,
                writable: ev.filter == EVFILT_WRITE,
            })
        }));

        Ok(())
    }

    /// Empty the wake pipe once a wake-up has been observed.
    fn drain_wake_pipe(&self) {
        let mut buf = [0u8; 16];
        unsafe {
            libc::read(self.wake_read, buf.as_mut_ptr() as *mut _, buf.len());
        }
    }
}

impl Drop for KqueuePoller {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.wake_read);
            libc::close(self.kqueue);
        }
    }
}
