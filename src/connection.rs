//! Connection lifecycle (C4): reference counting, the one-shot closing
//! flag, and the fixed-capacity read/write scratch a reactor drives.
//!
//! Grounded on `original_source/linux/advanced-reactor-server/connection.c`
//! (the lifecycle-aware `common.h`/`connection.c` pair spec.md §9 names as
//! authoritative). The manual `ref_count`/`closing` protocol is kept even
//! though `Arc<Connection>` already makes use-after-free structurally
//! impossible in Rust: it is the mechanism the rest of the crate uses to
//! decide *when it is still legal to issue I/O*, which is a correctness
//! property `Arc` alone cannot express. Every `acquire()` call in this
//! crate is paired with cloning an `Arc<Connection>`; every `release()`
//! call is paired with dropping that clone, so the manual count and the
//! `Arc` strong count move in lockstep (asserted by the test below).
//!
//! The fixed-capacity buffers and the socket itself live behind their own
//! mutex rather than being left to undocumented thread-affinity: spec.md
//! assumes only the owning reactor ever touches them, and in this crate
//! that remains true in practice, but guarding them costs one uncontended
//! lock and buys the compiler's enforcement instead of a comment's.

use std::io::{self, ErrorKind, Read, Write};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use mio::net::TcpStream;
use mio::{Interest, Registry, Token};

use crate::event::EventMask;

/// BUFFER_SIZE from `original_source/linux/advanced-reactor-server/common.h`.
pub const BUFFER_SIZE: usize = 4096;

/// A connection's position in the state machine. States only ever advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnState {
    /// Freshly accepted, not yet registered for I/O.
    Connected,
    /// Armed for `READ`.
    Reading,
    /// Armed for `WRITE`, draining a pending response.
    Writing,
    /// `mark_closing` has run; no further I/O may be issued.
    Closing,
    /// The last reference has been released; observable only transiently.
    Closed,
}

struct Lifecycle {
    state: ConnState,
    closing: bool,
    ref_count: usize,
}

struct Io {
    stream: Option<TcpStream>,
    read_buf: [u8; BUFFER_SIZE],
    write_buf: [u8; BUFFER_SIZE],
    write_pos: usize,
    write_size: usize,
    last_active: Instant,
}

/// The per-connection object shared across the reactor, the worker that
/// processes its bytes, and any in-flight worker-to-reactor message.
pub struct Connection {
    id: u64,
    peer_addr: SocketAddr,
    lifecycle: Mutex<Lifecycle>,
    io: Mutex<Io>,
    owning_reactor: AtomicUsize,
    slot: AtomicUsize,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .finish_non_exhaustive()
    }
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Sentinel meaning "not yet handed off to a reactor" / "not yet registered".
const UNSET: usize = usize::MAX;

/// Outcome of draining readable bytes in the edge-triggered read loop.
pub enum ReadOutcome {
    /// `n` bytes of application data were read; the caller should submit a
    /// `PROCESS` task carrying a copy of them.
    Data(Vec<u8>),
    /// The peer closed its side (`read` returned `0`).
    PeerClosed,
    /// No more data is available right now; stop reading.
    WouldBlock,
    /// An unrecoverable I/O error occurred.
    Error(io::Error),
}

impl std::fmt::Debug for ReadOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadOutcome::Data(bytes) => f.debug_tuple("Data").field(&bytes.len()).finish(),
            ReadOutcome::PeerClosed => write!(f, "PeerClosed"),
            ReadOutcome::WouldBlock => write!(f, "WouldBlock"),
            ReadOutcome::Error(e) => f.debug_tuple("Error").field(e).finish(),
        }
    }
}

/// Outcome of draining the write buffer in the write loop.
pub enum WriteOutcome {
    /// All buffered bytes were written; the connection should return to
    /// `READ|ET`. Carries the number of bytes written in this call.
    Complete(usize),
    /// Some bytes were written, but `WouldBlock` was hit before the buffer
    /// drained; stay armed for `WRITE|ET`. Carries the number of bytes
    /// written in this call.
    Partial(usize),
    /// Nothing was pending to write in the first place.
    Idle,
    /// An unrecoverable I/O error occurred.
    Error(io::Error),
}

impl std::fmt::Debug for WriteOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteOutcome::Complete(n) => f.debug_tuple("Complete").field(n).finish(),
            WriteOutcome::Partial(n) => f.debug_tuple("Partial").field(n).finish(),
            WriteOutcome::Idle => write!(f, "Idle"),
            WriteOutcome::Error(e) => f.debug_tuple("Error").field(e).finish(),
        }
    }
}

impl Connection {
    /// Builds a freshly accepted connection with `ref_count = 1` (the
    /// reference the acceptor's handoff itself holds) and state
    /// `Connected`.
    pub fn new(stream: TcpStream, peer_addr: SocketAddr) -> Self {
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            peer_addr,
            lifecycle: Mutex::new(Lifecycle {
                state: ConnState::Connected,
                closing: false,
                ref_count: 1,
            }),
            io: Mutex::new(Io {
                stream: Some(stream),
                read_buf: [0u8; BUFFER_SIZE],
                write_buf: [0u8; BUFFER_SIZE],
                write_pos: 0,
                write_size: 0,
                last_active: Instant::now(),
            }),
            owning_reactor: AtomicUsize::new(UNSET),
            slot: AtomicUsize::new(UNSET),
        }
    }

    /// Sets the non-owning back-reference to the reactor this connection was
    /// handed off to. Set exactly once, at handoff time (I4: a connection is
    /// registered with at most one reactor for its lifetime).
    pub fn set_owning_reactor(&self, reactor_id: usize) {
        self.owning_reactor.store(reactor_id, Ordering::Release);
    }

    /// The reactor this connection belongs to, if handoff has completed.
    pub fn owning_reactor(&self) -> Option<usize> {
        match self.owning_reactor.load(Ordering::Acquire) {
            UNSET => None,
            id => Some(id),
        }
    }

    /// Records the slab key the owning reactor registered this connection
    /// under, so later `reregister`/`deregister` calls can rebuild its
    /// `Token` without a reverse lookup.
    pub fn set_slot(&self, slot: usize) {
        self.slot.store(slot, Ordering::Release);
    }

    /// The slab key this connection is registered under, if any.
    pub fn slot(&self) -> Option<usize> {
        match self.slot.load(Ordering::Acquire) {
            UNSET => None,
            slot => Some(slot),
        }
    }

    /// Opaque identity, stable for the life of the object. Used for logging
    /// and by tests asserting fd-style uniqueness, since the real fd is
    /// owned by `mio::net::TcpStream` and never observed directly.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Address captured at accept time.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// `ref_count += 1`. Panics if called on an already-dead connection
    /// (`ref_count` of `0`), which would mean resurrecting a dropped
    /// object — a programming defect the spec explicitly forbids (I1).
    pub fn acquire(&self) {
        let mut lifecycle = self.lifecycle.lock().unwrap();
        assert!(
            lifecycle.ref_count >= 1,
            "acquire() on a connection with ref_count == 0"
        );
        lifecycle.ref_count += 1;
    }

    /// `ref_count -= 1`. Returns `true` iff this call dropped the count to
    /// zero. The caller (always whoever is dropping their `Arc<Connection>`
    /// clone in the same breath) does not need to free anything further;
    /// `Arc` handles that. The boolean exists for accounting and
    /// diagnostic logging.
    pub fn release(&self) -> bool {
        let mut lifecycle = self.lifecycle.lock().unwrap();
        assert!(lifecycle.ref_count >= 1, "release() underflowed ref_count");
        lifecycle.ref_count -= 1;
        if lifecycle.ref_count == 0 {
            lifecycle.state = ConnState::Closed;
            true
        } else {
            false
        }
    }

    /// Current `ref_count`, for diagnostics and tests.
    pub fn ref_count(&self) -> usize {
        self.lifecycle.lock().unwrap().ref_count
    }

    /// Idempotent. On the first call: sets `closing`, advances `state` to
    /// `Closing`, and drops the socket (the Rust analogue of "set `fd` to
    /// `-1`"). Returns `true` the first time it runs, `false` on every
    /// subsequent call.
    pub fn mark_closing(&self) -> bool {
        {
            let mut lifecycle = self.lifecycle.lock().unwrap();
            if lifecycle.closing {
                return false;
            }
            lifecycle.closing = true;
            lifecycle.state = ConnState::Closing;
        }
        let mut io = self.io.lock().unwrap();
        io.stream.take();
        true
    }

    /// `!closing && state != Closed`, read under the mutex.
    pub fn is_valid(&self) -> bool {
        let lifecycle = self.lifecycle.lock().unwrap();
        !lifecycle.closing && lifecycle.state != ConnState::Closed
    }

    /// Current state, for diagnostics and tests.
    pub fn state(&self) -> ConnState {
        self.lifecycle.lock().unwrap().state
    }

    fn set_state(&self, state: ConnState) {
        self.lifecycle.lock().unwrap().state = state;
    }

    /// Registers the connection's socket with `registry` under `token`,
    /// translating `mask` through the spec's `EventMask` vocabulary.
    pub fn register(&self, registry: &Registry, token: Token, mask: EventMask) -> io::Result<()> {
        let mut io = self.io.lock().unwrap();
        let interest = mask_to_interest(mask)?;
        match io.stream.as_mut() {
            Some(stream) => registry.register(stream, token, interest),
            None => Err(closed_error()),
        }
    }

    /// Switches a connection's registered interest (e.g. `READ|ET` to
    /// `WRITE|ET` once a response is ready).
    pub fn reregister(&self, registry: &Registry, token: Token, mask: EventMask) -> io::Result<()> {
        let mut io = self.io.lock().unwrap();
        let interest = mask_to_interest(mask)?;
        match io.stream.as_mut() {
            Some(stream) => registry.reregister(stream, token, interest),
            None => Err(closed_error()),
        }
    }

    /// Deregisters the connection's socket, if still open. Best-effort:
    /// `mark_closing` having already dropped the socket typically means
    /// this is a no-op on Linux (closing an fd already drops its epoll
    /// registration).
    pub fn deregister(&self, registry: &Registry) -> io::Result<()> {
        let mut io = self.io.lock().unwrap();
        match io.stream.as_mut() {
            Some(stream) => registry.deregister(stream),
            None => Ok(()),
        }
    }

    /// Drains one edge-triggered readiness notification's worth of bytes.
    /// Advances state to `Reading` and stamps `last_active` on progress.
    pub fn drain_read(&self) -> ReadOutcome {
        let mut io = self.io.lock().unwrap();
        let stream = match io.stream.as_mut() {
            Some(s) => s,
            None => return ReadOutcome::WouldBlock,
        };
        let mut buf = [0u8; BUFFER_SIZE];
        match stream.read(&mut buf) {
            Ok(0) => ReadOutcome::PeerClosed,
            Ok(n) => {
                io.last_active = Instant::now();
                drop(io);
                self.set_state(ConnState::Reading);
                ReadOutcome::Data(buf[..n].to_vec())
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => ReadOutcome::WouldBlock,
            Err(e) if e.kind() == ErrorKind::Interrupted => ReadOutcome::WouldBlock,
            Err(e) => ReadOutcome::Error(e),
        }
    }

    /// Loads `bytes` into the write buffer (truncating if it exceeds
    /// `BUFFER_SIZE`, per spec.md §4.8's buffering contract) and arms the
    /// connection for writing. Returns the number of bytes actually staged.
    pub fn stage_write(&self, bytes: &[u8]) -> usize {
        let mut io = self.io.lock().unwrap();
        let n = bytes.len().min(BUFFER_SIZE);
        io.write_buf[..n].copy_from_slice(&bytes[..n]);
        io.write_pos = 0;
        io.write_size = n;
        drop(io);
        self.set_state(ConnState::Writing);
        n
    }

    /// True while a response is staged and not yet fully flushed: a new
    /// `RESPONSE_READY` must not be accepted while this holds.
    pub fn has_pending_write(&self) -> bool {
        let io = self.io.lock().unwrap();
        io.write_size > 0 && io.write_pos < io.write_size
    }

    /// Drains the write buffer until it empties or the socket blocks.
    pub fn drain_write(&self) -> WriteOutcome {
        let mut io = self.io.lock().unwrap();
        if io.write_size == 0 {
            return WriteOutcome::Idle;
        }
        let Io {
            stream,
            write_buf,
            write_pos,
            write_size,
            last_active,
            ..
        } = &mut *io;
        let stream = match stream.as_mut() {
            Some(s) => s,
            None => return WriteOutcome::Error(closed_error()),
        };

        let start_pos = *write_pos;

        loop {
            if *write_pos >= *write_size {
                break;
            }
            match stream.write(&write_buf[*write_pos..*write_size]) {
                Ok(0) => break,
                Ok(n) => {
                    *write_pos += n;
                    *last_active = Instant::now();
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return WriteOutcome::Error(e),
            }
        }

        let written = io.write_pos - start_pos;

        if io.write_pos >= io.write_size {
            io.write_pos = 0;
            io.write_size = 0;
            drop(io);
            self.set_state(ConnState::Reading);
            WriteOutcome::Complete(written)
        } else {
            WriteOutcome::Partial(written)
        }
    }
}

fn mask_to_interest(mask: EventMask) -> io::Result<Interest> {
    mask.requestable().to_interest().ok_or_else(|| {
        io::Error::new(ErrorKind::InvalidInput, "empty interest for registration")
    })
}

fn closed_error() -> io::Error {
    io::Error::new(ErrorKind::NotConnected, "connection already closed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpStream as StdTcpStream;
    use std::sync::Arc;

    fn connected_pair() -> (Connection, StdTcpStream) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = StdTcpStream::connect(addr).unwrap();
        let (server_std, peer) = listener.accept().unwrap();
        server_std.set_nonblocking(true).unwrap();
        let server = TcpStream::from_std(server_std);
        (Connection::new(server, peer), client)
    }

    #[test]
    fn acquire_release_round_trips_ref_count() {
        let (conn, _client) = connected_pair();
        assert_eq!(conn.ref_count(), 1);
        conn.acquire();
        assert_eq!(conn.ref_count(), 2);
        assert!(!conn.release());
        assert_eq!(conn.ref_count(), 1);
    }

    #[test]
    fn mark_closing_is_idempotent() {
        let (conn, _client) = connected_pair();
        assert!(conn.mark_closing());
        assert!(!conn.mark_closing());
        assert!(!conn.is_valid());
        assert_eq!(conn.state(), ConnState::Closing);
    }

    #[test]
    fn is_valid_false_once_closing() {
        let (conn, _client) = connected_pair();
        assert!(conn.is_valid());
        conn.mark_closing();
        assert!(!conn.is_valid());
    }

    #[test]
    fn release_to_zero_marks_closed_state() {
        let (conn, _client) = connected_pair();
        assert!(conn.release());
        assert_eq!(conn.state(), ConnState::Closed);
    }

    #[test]
    fn ref_count_tracks_arc_clones_in_lockstep() {
        let (conn, _client) = connected_pair();
        let conn = Arc::new(conn);
        conn.acquire();
        let clone = conn.clone();
        assert_eq!(Arc::strong_count(&conn), 2);
        assert_eq!(conn.ref_count(), 2);
        drop(clone);
        conn.release();
        assert_eq!(conn.ref_count(), 1);
    }

    #[test]
    fn stage_write_truncates_to_buffer_capacity() {
        let (conn, _client) = connected_pair();
        let oversized = vec![b'x'; BUFFER_SIZE + 100];
        let staged = conn.stage_write(&oversized);
        assert_eq!(staged, BUFFER_SIZE);
        assert!(conn.has_pending_write());
    }

    #[test]
    fn state_does_not_regress_on_close() {
        let (conn, _client) = connected_pair();
        conn.stage_write(b"hi");
        assert_eq!(conn.state(), ConnState::Writing);
        conn.mark_closing();
        assert_eq!(conn.state(), ConnState::Closing);
    }
}
