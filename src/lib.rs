//! # fibrio
//!
//! **fibrio** runs code written in straight-line, blocking style on top
//! of a single-threaded asynchronous reactor. Worker tasks are stackful
//! fibers: each has its own stack and suspends at I/O points without
//! unwinding. The reactor drives non-blocking socket, timer and signal
//! operations; every completion wakes exactly the fiber that issued it
//! and hands it a plain [`Result`].
//!
//! Each OS thread hosts one [`ThreadGuard`] owning one
//! [`ThreadContext`]: a reactor, a stop source and a fiber scheduler.
//! Inside the guard, operations take a yield token to look synchronous:
//!
//! ```ignore
//! use fibrio::net::TcpAcceptor;
//! use fibrio::{ThreadGuard, TimedYield, Yield};
//! use std::time::Duration;
//!
//! let guard = ThreadGuard::new()?;
//! guard.run(|ctx| {
//!     let acceptor = TcpAcceptor::bind("127.0.0.1:8080")?;
//!     loop {
//!         // Suspends this fiber; other fibers keep running.
//!         let (client, addr) = acceptor.accept(Yield)?;
//!
//!         fibrio::spawn(move || {
//!             let mut buf = [0u8; 1024];
//!             // Give up after five seconds of silence.
//!             while let Ok(n @ 1..) = client.read(&mut buf, TimedYield::after(Duration::from_secs(5))) {
//!                 if client.write_all(&buf[..n], Yield).is_err() {
//!                     break;
//!                 }
//!             }
//!         });
//!     }
//! });
//! ```
//!
//! Shutdown is cooperative: resources wrapped in a [`StopGuard`]
//! register with the context's [`StopSource`], and
//! [`ThreadContext::stop`] cancels them all, which completes every
//! pending operation with `Err(Aborted)` and unblocks every suspended
//! fiber. No fiber is ever killed; each one observes the error and
//! returns.
//!
//! Scheduling is cooperative and single-threaded per context: fibers
//! on one thread never run concurrently, and the only blocking point
//! is the reactor's own poll. Multiple contexts on separate threads
//! (see [`ThreadGroup`]) communicate solely through [`Remote`] job
//! injection.
//!
//! ## Modules
//!
//! - [`net`]: TCP acceptor and stream
//! - [`time`]: waitable timers
//! - [`signal`]: Unix signals as completions

mod adapter;
mod error;
mod fiber;
mod reactor;
mod stop;
mod thread;
mod utils;

pub mod net;
pub mod signal;
pub mod time;

pub use adapter::{TimedYield, Yield, YieldToken};
pub use error::{Error, Result};
pub use fiber::{spawn, yield_now};
pub use stop::{
    FnStopToken, StopGuard, StopMode, StopRegistration, StopSource, StopToken, stop_fn,
};
pub use thread::{Remote, ThreadContext, ThreadGroup, ThreadGuard, current_thread_context};
