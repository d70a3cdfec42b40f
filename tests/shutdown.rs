use fibrio::net::TcpAcceptor;
use fibrio::time::Timer;
use fibrio::{StopGuard, ThreadGuard, Yield};

use std::rc::Rc;
use std::cell::Cell;
use std::time::{Duration, Instant};

#[test]
fn stop_unblocks_a_pending_accept() {
    let guard = ThreadGuard::new().expect("failed to create a thread context");

    let start = Instant::now();
    let accept_outcome = guard.run(|_ctx| {
        let outcome = Rc::new(Cell::new(None));

        let seen = outcome.clone();
        fibrio::spawn(move || {
            let acceptor = StopGuard::new(TcpAcceptor::bind("127.0.0.1:0").expect("bind failed"));
            let result = acceptor.accept(Yield);
            seen.set(Some(result.is_err_and(|e| e.is_aborted())));
        });

        fibrio::spawn(|| {
            let timer = Timer::new();
            timer.expires_after(Duration::from_millis(50));
            timer.wait(Yield).expect("timer wait failed");

            let ctx = fibrio::current_thread_context().expect("no context");
            ctx.stop();
        });

        outcome
    });

    assert_eq!(
        accept_outcome.get(),
        Some(true),
        "the accepting fiber should wake with Err(Aborted)"
    );
    assert!(
        start.elapsed() < Duration::from_secs(5),
        "shutdown took too long"
    );
}

#[test]
fn stop_is_idempotent() {
    let guard = ThreadGuard::new().expect("failed to create a thread context");

    let stopped = guard.run(|ctx| {
        ctx.stop();
        ctx.stop();

        // The guarded wait is cancelled by the first stop broadcast;
        // the duplicate request must not trip anything.
        let timer = StopGuard::new(Timer::new());
        timer.expires_after(Duration::from_secs(30));
        let _ = timer.wait(Yield);

        ctx.stopped()
    });

    assert!(stopped);
}

#[test]
fn stopping_twice_from_outside_is_safe() {
    let guard = ThreadGuard::new().expect("failed to create a thread context");

    guard.run(|ctx| {
        ctx.stop();
    });

    // The guard's own drop will stop the context a second time.
    drop(guard);
}

#[test]
fn guarded_resources_are_torn_down_once_on_stop() {
    let guard = ThreadGuard::new().expect("failed to create a thread context");

    let waited = guard.run(|_ctx| {
        let waited = Rc::new(Cell::new(false));

        let seen = waited.clone();
        fibrio::spawn(move || {
            let timer = StopGuard::new(Timer::new());
            timer.expires_after(Duration::from_secs(30));
            let result = timer.wait(Yield);
            seen.set(result.is_err_and(|e| e.is_aborted()));
        });

        fibrio::spawn(|| {
            let nap = Timer::new();
            nap.expires_after(Duration::from_millis(30));
            nap.wait(Yield).expect("nap failed");
            fibrio::current_thread_context()
                .expect("no context")
                .stop();
        });

        waited
    });

    assert!(waited.get(), "the guarded timer wait should abort");
}
