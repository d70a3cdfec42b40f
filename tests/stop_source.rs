use fibrio::{StopMode, StopSource, StopToken, ThreadGuard, stop_fn};

use std::cell::RefCell;
use std::rc::Rc;

#[test]
fn stop_reaches_tokens_in_registration_order() {
    let source = StopSource::new();
    let order = Rc::new(RefCell::new(Vec::new()));

    let tokens: Vec<_> = ["first", "second", "third"]
        .into_iter()
        .map(|name| {
            let order = order.clone();
            stop_fn(move |_| {
                order.borrow_mut().push(name);
                true
            })
        })
        .collect();

    let _registrations: Vec<_> = tokens
        .iter()
        .map(|token| source.add(token.clone() as Rc<dyn StopToken>))
        .collect();

    source.stop(StopMode::Force);

    assert_eq!(*order.borrow(), vec!["first", "second", "third"]);

    // A second broadcast finds the list already cleared.
    source.stop(StopMode::Force);
    assert_eq!(order.borrow().len(), 3);
}

#[test]
fn the_stop_mode_is_passed_through() {
    let source = StopSource::new();
    let seen = Rc::new(RefCell::new(Vec::new()));

    let modes = seen.clone();
    let token = stop_fn(move |mode| {
        modes.borrow_mut().push(mode);
        true
    });

    let _registration = source.add(token.clone() as Rc<dyn StopToken>);
    source.stop(StopMode::Smooth);

    assert_eq!(*seen.borrow(), vec![StopMode::Smooth]);
}

#[test]
fn a_panicking_token_does_not_stall_the_broadcast() {
    let source = StopSource::new();
    let reached = Rc::new(RefCell::new(false));

    let bad = stop_fn(|_| panic!("resource misbehaved"));
    let flag = reached.clone();
    let good = stop_fn(move |_| {
        *flag.borrow_mut() = true;
        true
    });

    let _first = source.add(bad.clone() as Rc<dyn StopToken>);
    let _second = source.add(good.clone() as Rc<dyn StopToken>);

    source.stop(StopMode::Force);

    assert!(*reached.borrow(), "tokens after the panic were skipped");
}

#[test]
fn context_stop_source_drives_registered_closures() {
    let guard = ThreadGuard::new().expect("failed to create a thread context");

    let fired = guard.run(|ctx| {
        let fired = Rc::new(RefCell::new(0));

        let count = fired.clone();
        let token = stop_fn(move |_| {
            *count.borrow_mut() += 1;
            true
        });
        let registration = ctx.stop_source().add(token.clone() as Rc<dyn StopToken>);
        // Keep the token linked past the entry function.
        std::mem::forget(registration);
        std::mem::forget(token);

        ctx.stop();

        // One reactor turn for the dispatched stop job.
        let timer = fibrio::StopGuard::new(fibrio::time::Timer::new());
        timer.expires_after(std::time::Duration::from_secs(30));
        let _ = timer.wait(fibrio::Yield);

        fired
    });

    assert_eq!(*fired.borrow(), 1, "the stop broadcast should fire once");
}
