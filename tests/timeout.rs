use fibrio::time::Timer;
use fibrio::{ThreadGuard, TimedYield};

use std::time::{Duration, Instant};

#[test]
fn timeout_wins_over_a_slower_operation() {
    let guard = ThreadGuard::new().expect("failed to create a thread context");

    let (result, elapsed) = guard.run(|_ctx| {
        let timer = Timer::new();
        timer.expires_after(Duration::from_secs(1));

        let start = Instant::now();
        let result = timer.wait(TimedYield::after(Duration::from_millis(100)));
        (result, start.elapsed())
    });

    assert!(
        result.as_ref().is_err_and(|e| e.is_timed_out()),
        "expected Err(TimedOut), got {result:?}"
    );
    assert!(
        elapsed >= Duration::from_millis(100),
        "timed out after only {elapsed:?}"
    );
    assert!(
        elapsed < Duration::from_secs(1),
        "timeout did not cancel the underlying timer ({elapsed:?})"
    );
}

#[test]
fn fast_operations_beat_the_deadline() {
    let guard = ThreadGuard::new().expect("failed to create a thread context");

    let result = guard.run(|_ctx| {
        let timer = Timer::new();
        timer.expires_after(Duration::from_millis(20));
        timer.wait(TimedYield::after(Duration::from_secs(5)))
    });

    assert!(result.is_ok(), "expected Ok, got {result:?}");
}

#[test]
fn absolute_deadlines_are_honoured() {
    let guard = ThreadGuard::new().expect("failed to create a thread context");

    let (result, elapsed) = guard.run(|_ctx| {
        let timer = Timer::new();
        timer.expires_after(Duration::from_secs(10));

        let start = Instant::now();
        let result = timer.wait(TimedYield::at(start + Duration::from_millis(60)));
        (result, start.elapsed())
    });

    assert!(result.as_ref().is_err_and(|e| e.is_timed_out()));
    assert!(elapsed >= Duration::from_millis(60));
    assert!(elapsed < Duration::from_secs(10));
}

#[test]
fn an_expired_deadline_still_delivers_exactly_one_outcome() {
    let guard = ThreadGuard::new().expect("failed to create a thread context");

    let result = guard.run(|_ctx| {
        let timer = Timer::new();
        timer.expires_after(Duration::from_secs(10));
        timer.wait(TimedYield::after(Duration::ZERO))
    });

    assert!(result.as_ref().is_err_and(|e| e.is_timed_out()));
}
