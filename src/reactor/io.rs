use std::os::fd::RawFd;

/// Completion callback of a pending reactor operation.
///
/// Invoked exactly once: with `Ok(())` when the awaited readiness
/// arrives, or with `Err(Aborted)` when the operation is cancelled or
/// its resource is closed.
pub(crate) type IoCallback = Box<dyn FnOnce(crate::Result<()>)>;

/// A pending readiness operation registered with the reactor.
///
/// One entry exists per outstanding wait; the slab index of the entry
/// is the poller token for the file descriptor. The entry completes on
/// any event for its descriptor; a woken fiber retries its syscall
/// and re-registers if the readiness was not the kind it needed.
pub(crate) struct IoEntry {
    /// File descriptor being waited on.
    pub(crate) fd: RawFd,

    /// Completion invoked when the wait resolves.
    pub(crate) callback: IoCallback,
}
