use fibrio::time::Timer;
use fibrio::{StopGuard, ThreadGroup, Yield};

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Entry function that parks the thread on a guarded timer until the
/// group shuts it down.
fn park(ctx: &fibrio::ThreadContext) {
    let timer = StopGuard::new(Timer::new());
    while !ctx.stopped() {
        timer.expires_after(Duration::from_secs(60));
        if timer.wait(Yield).is_err() {
            break;
        }
    }
}

#[test]
fn posted_jobs_run_on_every_thread() {
    let mut group = ThreadGroup::new();
    group.add_threads(2, park);

    let hits = Arc::new(AtomicUsize::new(0));

    let counter = hits.clone();
    group.post(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let deadline = Instant::now() + Duration::from_secs(5);
    while hits.load(Ordering::SeqCst) < 2 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }

    assert_eq!(hits.load(Ordering::SeqCst), 2, "broadcast missed a thread");

    group.stop_all();
}

#[test]
fn posted_jobs_observe_their_thread_context() {
    let mut group = ThreadGroup::new();
    group.add_thread(park);

    let observed = Arc::new(AtomicUsize::new(0));

    let seen = observed.clone();
    group.post(move || {
        if fibrio::current_thread_context().is_some() {
            seen.fetch_add(1, Ordering::SeqCst);
        }
    });

    let deadline = Instant::now() + Duration::from_secs(5);
    while observed.load(Ordering::SeqCst) < 1 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }

    assert_eq!(observed.load(Ordering::SeqCst), 1);

    group.stop_all();
}

#[test]
fn stop_all_unparks_and_joins_every_thread() {
    let mut group = ThreadGroup::new();
    group.add_threads(3, park);

    let start = Instant::now();
    group.stop_all();

    assert!(
        start.elapsed() < Duration::from_secs(5),
        "stop_all should not wait for the parked timers"
    );
}

#[test]
fn remotes_can_stop_individual_threads() {
    let mut group = ThreadGroup::new();
    group.add_thread(park);

    let remote = group.remotes()[0].clone();
    remote.stop();

    let start = Instant::now();
    group.join_all();
    assert!(start.elapsed() < Duration::from_secs(5));
}
