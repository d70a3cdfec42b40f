use fibrio::ThreadGuard;

use std::cell::RefCell;
use std::rc::Rc;

#[test]
fn workers_run_in_spawn_order() {
    let guard = ThreadGuard::new().expect("failed to create a thread context");

    let order = guard.run(|_ctx| {
        let order = Rc::new(RefCell::new(Vec::new()));

        for i in 0..3 {
            let order = order.clone();
            fibrio::spawn(move || {
                order.borrow_mut().push(i);
            });
        }

        // Workers have not run yet: the main fiber holds the thread
        // until it suspends or finishes.
        assert!(order.borrow().is_empty());

        order
    });

    assert_eq!(*order.borrow(), vec![0, 1, 2]);
}

#[test]
fn yield_now_interleaves_fibers_fairly() {
    let guard = ThreadGuard::new().expect("failed to create a thread context");

    let trace = guard.run(|_ctx| {
        let trace = Rc::new(RefCell::new(Vec::new()));

        for name in ["a", "b"] {
            let trace = trace.clone();
            fibrio::spawn(move || {
                for round in 0..3 {
                    trace.borrow_mut().push((name, round));
                    fibrio::yield_now();
                }
            });
        }

        trace
    });

    let expected = vec![
        ("a", 0),
        ("b", 0),
        ("a", 1),
        ("b", 1),
        ("a", 2),
        ("b", 2),
    ];
    assert_eq!(*trace.borrow(), expected);
}

#[test]
fn spawn_inside_a_worker_is_deferred() {
    let guard = ThreadGuard::new().expect("failed to create a thread context");

    let order = guard.run(|_ctx| {
        let order = Rc::new(RefCell::new(Vec::new()));

        let outer = order.clone();
        fibrio::spawn(move || {
            let inner = outer.clone();
            fibrio::spawn(move || {
                inner.borrow_mut().push("child");
            });
            outer.borrow_mut().push("parent");
        });

        order
    });

    assert_eq!(*order.borrow(), vec!["parent", "child"]);
}

#[test]
#[should_panic(expected = "spawn called outside of a thread context")]
fn spawn_requires_a_thread_context() {
    fibrio::spawn(|| {});
}
