use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;
use std::time::Instant;

/// Completion callback of a pending reactor timer.
pub(crate) type TimerCallback = Box<dyn FnOnce(crate::Result<()>)>;

/// Shared state of a scheduled timer.
///
/// The heap entry and the handle held by the submitter both point at
/// this state. Cancellation takes the callback out; a heap entry whose
/// state has no callback left is dead and skipped on expiry.
pub(crate) struct TimerState {
    callback: RefCell<Option<TimerCallback>>,
}

impl TimerState {
    pub(crate) fn new(callback: TimerCallback) -> Rc<Self> {
        Rc::new(Self {
            callback: RefCell::new(Some(callback)),
        })
    }

    /// Takes the callback, disarming the timer. Returns `None` if it
    /// already fired or was cancelled.
    pub(crate) fn take(&self) -> Option<TimerCallback> {
        self.callback.borrow_mut().take()
    }

    /// Whether the timer still has a callback to deliver.
    pub(crate) fn is_armed(&self) -> bool {
        self.callback.borrow().is_some()
    }
}

/// Handle to a scheduled timer, used to cancel or discard it.
#[derive(Clone)]
pub(crate) struct TimerHandle(pub(crate) Rc<TimerState>);

/// An entry in the reactor timer queue.
///
/// Stored in a binary heap ordered by deadline. The comparison is
/// **reversed** so that `BinaryHeap<TimerEntry>` behaves as a
/// min-heap, popping the earliest deadline first.
pub(crate) struct TimerEntry {
    /// The time at which the timer should fire.
    pub(crate) deadline: Instant,

    /// Shared state carrying the completion callback.
    pub(crate) state: Rc<TimerState>,
}

impl Eq for TimerEntry {}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline.eq(&other.deadline)
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other.deadline.cmp(&self.deadline)
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
