use super::stream::TcpStream;
use crate::adapter::{YieldToken, wait_ready};
use crate::reactor::Interest;
use crate::reactor::poller::platform::{
    sys_accept, sys_bind, sys_close, sys_listen, sys_parse_sockaddr, sys_set_dual_stack,
    sys_set_reuseaddr, sys_socket, sys_sockname,
};
use crate::stop::{StopMode, StopToken};
use crate::thread::ThreadContext;
use crate::{Error, Result};

use std::cell::Cell;
use std::io;
use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::rc::Rc;

/// A listening TCP socket.
///
/// `bind` is synchronous: a port conflict surfaces immediately as
/// `Err(Io(AddrInUse))`. Accepting takes a yield token and suspends the
/// calling fiber until a connection arrives, the token's deadline
/// passes, or the acceptor is closed.
///
/// Closing the acceptor (directly, by drop, or through a stop
/// broadcast) aborts pending accepts with `Err(Aborted)`.
pub struct TcpAcceptor {
    ctx: Rc<ThreadContext>,
    fd: RawFd,
    closed: Cell<bool>,
}

impl TcpAcceptor {
    /// Bind and listen on `address` (e.g. `"127.0.0.1:8080"`).
    ///
    /// # Panics
    ///
    /// Panics if no thread context is installed on this thread.
    pub fn bind(address: &str) -> Result<Self> {
        let ctx = crate::current_thread_context()
            .expect("no thread context installed on this thread");

        let (storage, len) = sys_parse_sockaddr(address)?;
        let domain = storage.ss_family as libc::c_int;

        let fd = sys_socket(domain)?;

        let setup = (|| -> io::Result<()> {
            sys_set_reuseaddr(fd)?;
            sys_set_dual_stack(fd, domain)?;
            sys_bind(fd, &storage, len)?;
            sys_listen(fd)
        })();

        if let Err(err) = setup {
            sys_close(fd);
            return Err(err.into());
        }

        Ok(Self {
            ctx,
            fd,
            closed: Cell::new(false),
        })
    }

    /// Accept one connection.
    pub fn accept<Y: YieldToken>(&self, token: Y) -> Result<(TcpStream, SocketAddr)> {
        loop {
            if self.closed.get() {
                return Err(Error::Aborted);
            }

            match sys_accept(self.fd) {
                Ok((fd, addr)) => {
                    return Ok((TcpStream::from_parts(self.ctx.clone(), fd), addr));
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    wait_ready(&self.ctx, self.fd, Interest::READ, token)?;
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Local address of the listening socket.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(sys_sockname(self.fd)?)
    }

    /// Close the acceptor, aborting pending accepts. Idempotent.
    pub fn close(&self) {
        if !self.closed.replace(true) {
            self.ctx.reactor().abort_fd(self.fd);
            sys_close(self.fd);
        }
    }
}

impl StopToken for TcpAcceptor {
    fn stop(&self, _mode: StopMode) -> bool {
        self.close();
        true
    }
}

impl Drop for TcpAcceptor {
    fn drop(&mut self) {
        self.close();
    }
}
