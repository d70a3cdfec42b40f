use fibrio::time::Timer;
use fibrio::{ThreadGuard, Yield};

use std::time::{Duration, Instant};

#[test]
fn timer_completes_after_its_expiry() {
    let guard = ThreadGuard::new().expect("failed to create a thread context");

    let elapsed = guard.run(|_ctx| {
        let timer = Timer::new();
        timer.expires_after(Duration::from_millis(50));

        let start = Instant::now();
        timer.wait(Yield).expect("timer wait failed");
        start.elapsed()
    });

    assert!(
        elapsed >= Duration::from_millis(50),
        "timer fired after {elapsed:?}, expected at least 50ms"
    );
}

#[test]
fn expires_at_is_equivalent_to_expires_after() {
    let guard = ThreadGuard::new().expect("failed to create a thread context");

    let elapsed = guard.run(|_ctx| {
        let timer = Timer::new();
        let start = Instant::now();
        timer.expires_at(start + Duration::from_millis(30));

        timer.wait(Yield).expect("timer wait failed");
        start.elapsed()
    });

    assert!(elapsed >= Duration::from_millis(30));
}

#[test]
fn unarmed_timer_fires_immediately() {
    let guard = ThreadGuard::new().expect("failed to create a thread context");

    let elapsed = guard.run(|_ctx| {
        let timer = Timer::new();
        let start = Instant::now();
        timer.wait(Yield).expect("timer wait failed");
        start.elapsed()
    });

    assert!(elapsed < Duration::from_millis(100));
}

#[test]
fn cancel_aborts_a_pending_wait() {
    let guard = ThreadGuard::new().expect("failed to create a thread context");

    let result = guard.run(|_ctx| {
        let timer = std::rc::Rc::new(Timer::new());
        timer.expires_after(Duration::from_secs(10));

        let canceller = timer.clone();
        fibrio::spawn(move || {
            let nap = Timer::new();
            nap.expires_after(Duration::from_millis(20));
            nap.wait(Yield).expect("nap failed");
            canceller.cancel();
        });

        timer.wait(Yield)
    });

    assert!(
        result.as_ref().is_err_and(|e| e.is_aborted()),
        "expected Err(Aborted), got {result:?}"
    );
}

#[test]
fn timers_wake_fibers_in_deadline_order() {
    let guard = ThreadGuard::new().expect("failed to create a thread context");

    let order = guard.run(|_ctx| {
        let order = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));

        for (label, delay) in [(2u32, 40u64), (1, 20), (3, 60)] {
            let order = order.clone();
            fibrio::spawn(move || {
                let timer = Timer::new();
                timer.expires_after(Duration::from_millis(delay));
                timer.wait(Yield).expect("timer wait failed");
                order.borrow_mut().push(label);
            });
        }

        // Outlast every worker.
        let timer = Timer::new();
        timer.expires_after(Duration::from_millis(120));
        timer.wait(Yield).expect("timer wait failed");

        let result = order.borrow().clone();
        result
    });

    assert_eq!(order, vec![1, 2, 3]);
}
