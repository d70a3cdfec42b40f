//! TCP echo server on fibers.
//!
//! One fiber accepts connections, one fiber per client echoes its
//! bytes back, and the main fiber waits for SIGINT/SIGTERM. The
//! acceptor is stop-guarded, so the shutdown broadcast closes it and
//! the accept loop winds down by itself.
//!
//! Try it with `nc 127.0.0.1 9000`.

use fibrio::net::TcpAcceptor;
use fibrio::signal::SignalSet;
use fibrio::{StopGuard, ThreadGuard, Yield};

use std::rc::Rc;

fn main() -> fibrio::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let guard = ThreadGuard::new()?;
    guard.run(|ctx| {
        let acceptor = Rc::new(StopGuard::new(TcpAcceptor::bind("127.0.0.1:9000")?));
        println!("echo server listening on 127.0.0.1:9000");

        let server = acceptor.clone();
        fibrio::spawn(move || {
            loop {
                let (client, addr) = match server.accept(Yield) {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        tracing::debug!(error = %err, "accept loop finished");
                        break;
                    }
                };

                println!("accepted {addr}");

                fibrio::spawn(move || {
                    let mut buf = [0u8; 1024];
                    loop {
                        let n = match client.read(&mut buf, Yield) {
                            Ok(0) | Err(_) => break,
                            Ok(n) => n,
                        };
                        if client.write_all(&buf[..n], Yield).is_err() {
                            break;
                        }
                    }
                });
            }
        });

        let signals = StopGuard::new(SignalSet::new(&[libc::SIGINT, libc::SIGTERM])?);
        let signo = signals.wait(Yield)?;
        println!("caught signal {signo}, shutting down");

        ctx.stop();
        Ok(())
    })
}
