//! Non-blocking TCP, awaited from fibers.

mod acceptor;
mod stream;

pub use acceptor::TcpAcceptor;
pub use stream::TcpStream;
