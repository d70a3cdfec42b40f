use std::os::fd::RawFd;

/// I/O readiness interests for a registered file descriptor.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Interest {
    pub(crate) read: bool,
    pub(crate) write: bool,
}

impl Interest {
    pub(crate) const READ: Interest = Interest {
        read: true,
        write: false,
    };

    pub(crate) const WRITE: Interest = Interest {
        read: false,
        write: true,
    };
}

/// Wake-up handle for a blocked poller.
///
/// Wraps the writable end of the poller's internal wake channel
/// (an eventfd on Linux, a pipe on macOS). Writing to it makes a
/// blocking poll return immediately, which is how other threads
/// interrupt `run_one_until`.
pub(crate) struct Waker(pub(crate) RawFd);

unsafe impl Send for Waker {}
unsafe impl Sync for Waker {}

impl Drop for Waker {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.0);
        }
    }
}
