//! Acceptor (C7): owns the listening socket, accepts in a loop until
//! would-block, and hands each new connection to the reactor pool.
//!
//! Grounded on `original_source/linux/advanced-reactor-server/server.c`'s
//! `accept_connections`, which sets `SO_REUSEADDR`/`SO_REUSEPORT` on the
//! listener and `TCP_NODELAY` on every accepted peer before handing it to
//! `next_io_thread()`. `socket2` supplies `SO_REUSEPORT`, which neither `std`
//! nor `mio` expose portably; it's the same crate `pelikan-io/grow-a-cache`'s
//! mio event loop reaches for to do the same thing.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token};
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{info, warn};

use crate::connection::Connection;
use crate::error::ServerError;
use crate::reactor_pool::ReactorPool;

/// Listen backlog, per `original_source`'s `BACKLOG` constant (spec.md only
/// requires >= 128; this crate follows the original's larger figure).
pub const BACKLOG: i32 = 1024;

const LISTENER_TOKEN: Token = Token(0);

/// The single-threaded, event-driven owner of the listening socket.
pub struct Acceptor {
    listener: TcpListener,
    poll: Poll,
    events: Events,
    shutdown: Arc<AtomicBool>,
}

impl std::fmt::Debug for Acceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Acceptor").finish_non_exhaustive()
    }
}

impl Acceptor {
    /// Binds `addr`, setting `SO_REUSEADDR` (mandatory) and `SO_REUSEPORT`
    /// (best-effort, logged on failure).
    pub fn bind(addr: SocketAddr, shutdown: Arc<AtomicBool>) -> Result<Self, ServerError> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(|source| ServerError::Bind { port: addr.port(), source })?;
        socket
            .set_reuse_address(true)
            .map_err(|source| ServerError::Bind { port: addr.port(), source })?;
        if let Err(e) = socket.set_reuse_port(true) {
            warn!(error = %e, "SO_REUSEPORT unavailable, continuing without it");
        }
        socket
            .bind(&addr.into())
            .map_err(|source| ServerError::Bind { port: addr.port(), source })?;
        socket
            .listen(BACKLOG)
            .map_err(|source| ServerError::Bind { port: addr.port(), source })?;
        socket
            .set_nonblocking(true)
            .map_err(|source| ServerError::Bind { port: addr.port(), source })?;

        let mut listener = TcpListener::from_std(socket.into());
        let poll = Poll::new().map_err(ServerError::ReactorCreate)?;
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)
            .map_err(ServerError::ReactorCreate)?;

        info!(port = addr.port(), "listening");

        Ok(Self {
            listener,
            poll,
            events: Events::with_capacity(16),
            shutdown,
        })
    }

    /// Runs the accept loop until the shared shutdown flag is observed,
    /// handing every accepted connection to `pool.next_reactor()`.
    pub fn run(&mut self, pool: &ReactorPool) {
        while !self.shutdown.load(Ordering::Relaxed) {
            match self.poll.poll(&mut self.events, Some(Duration::from_millis(1))) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "acceptor poll() failed");
                    continue;
                }
            }
            if self.events.iter().next().is_some() {
                self.accept_all(pool);
            }
        }
    }

    fn accept_all(&mut self, pool: &ReactorPool) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        warn!(error = %e, "failed to set TCP_NODELAY");
                    }
                    let conn = Arc::new(Connection::new(stream, peer));
                    let handle = pool.next_reactor();
                    if handle.sender.send(conn.clone()).is_err() {
                        warn!(peer = %peer, "failed to hand off connection to reactor");
                        conn.release();
                    } else if handle.waker.wake().is_err() {
                        // The connection already made it onto the reactor's channel; its
                        // own poll timeout will pick it up without the wake. No release.
                        warn!(peer = %peer, "failed to wake reactor for new connection");
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) => {
                    warn!(error = %e, "accept() failed");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::TaskQueue;
    use std::net::TcpStream as StdTcpStream;
    use std::thread;

    #[test]
    fn accept_hands_connection_to_a_reactor() {
        let shutdown = Arc::new(AtomicBool::new(false));
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let mut acceptor = Acceptor::bind(addr, shutdown.clone()).unwrap();
        let bound_addr = acceptor.listener.local_addr().unwrap();

        let queue = Arc::new(TaskQueue::new(8));
        let (pool, _msg_handles) = ReactorPool::spawn(1, 16, queue, shutdown.clone()).unwrap();

        let accept_shutdown = shutdown.clone();
        let handle = thread::spawn(move || {
            while !accept_shutdown.load(Ordering::Relaxed) {
                acceptor.accept_all(&pool);
                std::thread::sleep(Duration::from_millis(1));
            }
            pool.join();
        });

        let _client = StdTcpStream::connect(bound_addr).unwrap();
        thread::sleep(Duration::from_millis(50));

        shutdown.store(true, Ordering::Relaxed);
        handle.join().unwrap();
    }
}
