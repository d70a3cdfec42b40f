use crate::adapter::{YieldToken, wait_ready};
use crate::reactor::Interest;
use crate::reactor::poller::platform::{
    sys_close, sys_connect, sys_get_socket_error, sys_peername, sys_read, sys_shutdown,
    sys_socket, sys_sockname, sys_write,
};
use crate::stop::{StopMode, StopToken};
use crate::thread::ThreadContext;
use crate::{Error, Result};

use std::cell::Cell;
use std::io;
use std::net::{Shutdown, SocketAddr};
use std::os::fd::RawFd;
use std::rc::Rc;
use std::str::FromStr;

/// A connected TCP stream.
///
/// Reads and writes take a yield token and suspend the calling fiber
/// until the socket is ready. Closing the stream (directly, by drop,
/// or through a stop broadcast) aborts pending operations with
/// `Err(Aborted)`.
pub struct TcpStream {
    ctx: Rc<ThreadContext>,
    fd: RawFd,
    closed: Cell<bool>,
}

impl TcpStream {
    pub(crate) fn from_parts(ctx: Rc<ThreadContext>, fd: RawFd) -> Self {
        Self {
            ctx,
            fd,
            closed: Cell::new(false),
        }
    }

    /// Connect to `address` (e.g. `"127.0.0.1:8080"`).
    ///
    /// # Panics
    ///
    /// Panics if no thread context is installed on this thread.
    pub fn connect<Y: YieldToken>(address: &str, token: Y) -> Result<Self> {
        let ctx = crate::current_thread_context()
            .expect("no thread context installed on this thread");

        let addr = SocketAddr::from_str(address)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid socket addr"))?;

        let domain = match addr {
            SocketAddr::V4(_) => libc::AF_INET,
            SocketAddr::V6(_) => libc::AF_INET6,
        };

        let fd = sys_socket(domain)?;
        let stream = Self::from_parts(ctx, fd);

        match sys_connect(fd, &addr) {
            Ok(()) => Ok(stream),
            Err(err)
                if err.kind() == io::ErrorKind::WouldBlock
                    || err.raw_os_error() == Some(libc::EINPROGRESS) =>
            {
                // Outcome of a non-blocking connect is reported through
                // writability plus SO_ERROR.
                stream.wait_writable(token)?;
                sys_get_socket_error(fd)?;
                Ok(stream)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Read into `buffer`, returning the number of bytes read.
    /// `Ok(0)` means the peer closed the connection.
    pub fn read<Y: YieldToken>(&self, buffer: &mut [u8], token: Y) -> Result<usize> {
        loop {
            if self.closed.get() {
                return Err(Error::Aborted);
            }

            let n = sys_read(self.fd, buffer);
            if n >= 0 {
                return Ok(n as usize);
            }

            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::WouldBlock => {
                    wait_ready(&self.ctx, self.fd, Interest::READ, token)?;
                }
                io::ErrorKind::Interrupted => {}
                _ => return Err(err.into()),
            }
        }
    }

    /// Write from `buffer`, returning the number of bytes written.
    pub fn write<Y: YieldToken>(&self, buffer: &[u8], token: Y) -> Result<usize> {
        loop {
            if self.closed.get() {
                return Err(Error::Aborted);
            }

            let n = sys_write(self.fd, buffer);
            if n >= 0 {
                return Ok(n as usize);
            }

            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::WouldBlock => {
                    wait_ready(&self.ctx, self.fd, Interest::WRITE, token)?;
                }
                io::ErrorKind::Interrupted => {}
                _ => return Err(err.into()),
            }
        }
    }

    /// Write the whole buffer.
    pub fn write_all<Y: YieldToken>(&self, mut buffer: &[u8], token: Y) -> Result<()> {
        while !buffer.is_empty() {
            let n = self.write(buffer, token)?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "failed to write whole buffer",
                )
                .into());
            }
            buffer = &buffer[n..];
        }
        Ok(())
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(sys_sockname(self.fd)?)
    }

    pub fn peer_addr(&self) -> Result<SocketAddr> {
        Ok(sys_peername(self.fd)?)
    }

    /// Shut down the read, write or both halves of the connection.
    pub fn shutdown(&self, how: Shutdown) -> Result<()> {
        Ok(sys_shutdown(self.fd, how)?)
    }

    /// Close the stream, aborting pending operations. Idempotent.
    pub fn close(&self) {
        if !self.closed.replace(true) {
            self.ctx.reactor().abort_fd(self.fd);
            sys_close(self.fd);
        }
    }

    fn wait_writable<Y: YieldToken>(&self, token: Y) -> Result<()> {
        wait_ready(&self.ctx, self.fd, Interest::WRITE, token)
    }
}

impl StopToken for TcpStream {
    fn stop(&self, _mode: StopMode) -> bool {
        self.close();
        true
    }
}

impl Drop for TcpStream {
    fn drop(&mut self) {
        self.close();
    }
}
