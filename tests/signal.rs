use fibrio::signal::SignalSet;
use fibrio::time::Timer;
use fibrio::{StopGuard, ThreadGuard, Yield};

use std::time::Duration;

// The signal tests share one process, so each uses a distinct signal
// number to avoid fighting over ownership.

#[test]
fn a_raised_signal_wakes_the_waiting_fiber() {
    let guard = ThreadGuard::new().expect("failed to create a thread context");

    let signo = guard.run(|_ctx| {
        let signals = SignalSet::new(&[libc::SIGUSR1]).expect("failed to claim SIGUSR1");

        fibrio::spawn(|| {
            let timer = Timer::new();
            timer.expires_after(Duration::from_millis(30));
            timer.wait(Yield).expect("timer wait failed");
            unsafe {
                libc::raise(libc::SIGUSR1);
            }
        });

        signals.wait(Yield).expect("signal wait failed")
    });

    assert_eq!(signo, libc::SIGUSR1);
}

#[test]
fn a_stop_broadcast_unblocks_a_signal_wait() {
    let guard = ThreadGuard::new().expect("failed to create a thread context");

    let result = guard.run(|_ctx| {
        let signals =
            StopGuard::new(SignalSet::new(&[libc::SIGUSR2]).expect("failed to claim SIGUSR2"));

        fibrio::spawn(|| {
            let timer = Timer::new();
            timer.expires_after(Duration::from_millis(30));
            timer.wait(Yield).expect("timer wait failed");
            fibrio::current_thread_context()
                .expect("no context")
                .stop();
        });

        signals.wait(Yield)
    });

    assert!(
        result.as_ref().is_err_and(|e| e.is_aborted()),
        "expected Err(Aborted), got {result:?}"
    );
}

#[test]
fn a_signal_number_is_owned_by_one_set_at_a_time() {
    let guard = ThreadGuard::new().expect("failed to create a thread context");

    guard.run(|_ctx| {
        let first = SignalSet::new(&[libc::SIGHUP]).expect("failed to claim SIGHUP");

        let second = SignalSet::new(&[libc::SIGHUP]);
        assert!(second.is_err(), "SIGHUP was claimed twice");

        // Releasing the first set frees the signal for reuse.
        drop(first);
        SignalSet::new(&[libc::SIGHUP]).expect("failed to reclaim SIGHUP");
    });
}
