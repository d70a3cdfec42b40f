use fibrio::net::{TcpAcceptor, TcpStream};
use fibrio::{Error, ThreadGuard, TimedYield, Yield};

use std::rc::Rc;
use std::time::{Duration, Instant};

#[test]
fn binding_a_taken_port_fails_synchronously() {
    let guard = ThreadGuard::new().expect("failed to create a thread context");

    guard.run(|_ctx| {
        let first = TcpAcceptor::bind("127.0.0.1:0").expect("first bind failed");
        let addr = first.local_addr().expect("no local addr");

        let second = TcpAcceptor::bind(&addr.to_string());
        match second {
            Err(Error::Io(err)) => {
                assert_eq!(err.kind(), std::io::ErrorKind::AddrInUse);
            }
            Err(other) => panic!("expected AddrInUse, got {other:?}"),
            Ok(_) => panic!("expected AddrInUse, but the bind succeeded"),
        }
    });
}

#[test]
fn echo_roundtrip_between_two_fibers() {
    let guard = ThreadGuard::new().expect("failed to create a thread context");

    let payload = guard.run(|_ctx| {
        let acceptor = Rc::new(TcpAcceptor::bind("127.0.0.1:0").expect("bind failed"));
        let addr = acceptor.local_addr().expect("no local addr");

        let server = acceptor.clone();
        fibrio::spawn(move || {
            let (client, _peer) = server.accept(Yield).expect("accept failed");
            let mut buf = [0u8; 64];
            loop {
                let n = client.read(&mut buf, Yield).expect("server read failed");
                if n == 0 {
                    break;
                }
                client.write_all(&buf[..n], Yield).expect("server write failed");
            }
        });

        let stream = TcpStream::connect(&addr.to_string(), Yield).expect("connect failed");
        stream.write_all(b"ping pong", Yield).expect("client write failed");
        stream
            .shutdown(std::net::Shutdown::Write)
            .expect("shutdown failed");

        let mut received = Vec::new();
        let mut buf = [0u8; 16];
        loop {
            let n = stream.read(&mut buf, Yield).expect("client read failed");
            if n == 0 {
                break;
            }
            received.extend_from_slice(&buf[..n]);
        }

        received
    });

    assert_eq!(payload, b"ping pong");
}

#[test]
fn accept_times_out_when_nobody_connects() {
    let guard = ThreadGuard::new().expect("failed to create a thread context");

    let (result, elapsed) = guard.run(|_ctx| {
        let acceptor = TcpAcceptor::bind("127.0.0.1:0").expect("bind failed");

        let start = Instant::now();
        let result = acceptor.accept(TimedYield::after(Duration::from_millis(80)));
        (result.map(|_| ()), start.elapsed())
    });

    assert!(
        result.as_ref().is_err_and(|e| e.is_timed_out()),
        "expected Err(TimedOut), got {result:?}"
    );
    assert!(elapsed >= Duration::from_millis(80));
    assert!(elapsed < Duration::from_secs(5));
}

#[test]
fn connecting_to_a_dead_port_reports_the_os_error() {
    let guard = ThreadGuard::new().expect("failed to create a thread context");

    let result = guard.run(|_ctx| {
        // Bind then drop to get a port nobody listens on.
        let acceptor = TcpAcceptor::bind("127.0.0.1:0").expect("bind failed");
        let addr = acceptor.local_addr().expect("no local addr");
        drop(acceptor);

        TcpStream::connect(&addr.to_string(), Yield).map(|_| ())
    });

    assert!(
        matches!(result, Err(Error::Io(ref err)) if err.kind() == std::io::ErrorKind::ConnectionRefused),
        "expected ConnectionRefused, got {result:?}"
    );
}
