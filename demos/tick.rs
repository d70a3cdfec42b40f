//! Periodic timer with a per-wait deadline.
//!
//! A worker fiber arms a ten-second timer but only ever waits one
//! second on it, so every wait comes back `Err(TimedOut)`: a heartbeat
//! carved out of a timer that never fires. SIGINT stops the context,
//! which cancels the guarded timer and ends the loop.

use fibrio::signal::SignalSet;
use fibrio::time::Timer;
use fibrio::{StopGuard, ThreadGuard, TimedYield, Yield};

use std::time::Duration;

fn main() -> fibrio::Result<()> {
    tracing_subscriber::fmt().init();

    let guard = ThreadGuard::new()?;
    guard.run(|ctx| {
        fibrio::spawn(|| {
            let ctx = fibrio::current_thread_context().expect("no context");
            let timer = StopGuard::new(Timer::new());

            while !ctx.stopped() {
                timer.expires_after(Duration::from_secs(10));
                match timer.wait(TimedYield::after(Duration::from_secs(1))) {
                    Err(err) if err.is_timed_out() => println!("tick"),
                    _ => break,
                }
            }
        });

        let signals = StopGuard::new(SignalSet::new(&[libc::SIGINT])?);
        let _ = signals.wait(Yield);

        ctx.stop();
        Ok(())
    })
}
