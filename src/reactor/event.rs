/// An I/O event reported by the poller.
///
/// An `Event` carries readiness information for a registered file
/// descriptor. It is produced by the poller and consumed by the
/// reactor to complete the pending operation stored under its token.
pub(crate) struct Event {
    /// Token identifying the pending operation inside the reactor.
    pub(crate) token: usize,

    /// Indicates that the file descriptor is readable.
    pub(crate) readable: bool,

    /// Indicates that the file descriptor is writable.
    pub(crate) writable: bool,
}
