//! Reactor thread (C5): owns one backend, two wakeup channels, and drives
//! read/write on the connections handed to it.
//!
//! Grounded on `original_source/linux/advanced-reactor-server/io_thread.c`'s
//! `io_thread_func` main loop, and on the teacher's `src/listener.rs` for the
//! `mio::Waker` + `crossbeam_channel` wakeup idiom (there used for a single
//! worker-to-listener return path; here instantiated twice per reactor, once
//! for the acceptor's handoff and once for the worker pool's responses).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use mio::{Registry, Token, Waker};
use slab::Slab;
use tracing::{debug, warn};

use crate::backend::{ReactorBackend, CONN_CHANNEL_TOKEN, MSG_CHANNEL_TOKEN};
use crate::connection::{Connection, ReadOutcome, WriteOutcome};
use crate::event::{EventMask, EventSource};
use crate::queue::TaskQueue;
use crate::stats::ReactorStats;
use crate::task::{MessageKind, ReactorMessage, Task};

/// How a reactor is reached from the acceptor: a channel carrying freshly
/// built connections, paired with the waker that interrupts the reactor's
/// blocked `wait()` so it notices them.
#[derive(Clone)]
pub struct ConnHandle {
    /// Where the acceptor posts freshly built connections.
    pub sender: Sender<Arc<Connection>>,
    /// Interrupts the reactor's blocked `wait()` so it drains the channel.
    pub waker: Arc<Waker>,
}

impl std::fmt::Debug for ConnHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnHandle").finish_non_exhaustive()
    }
}

/// How a reactor is reached from the worker pool. Re-exported from
/// [`crate::worker`] so callers assembling a reactor pool only need this
/// module.
pub use crate::worker::ReactorHandle;

/// One reactor thread's owned state.
pub struct Reactor {
    id: usize,
    backend: ReactorBackend,
    registry: Registry,
    connections: Slab<Arc<Connection>>,
    conn_rx: Receiver<Arc<Connection>>,
    _conn_waker: Arc<Waker>,
    msg_rx: Receiver<ReactorMessage>,
    _msg_waker: Arc<Waker>,
    task_queue: Arc<TaskQueue<Task>>,
    stats: Arc<ReactorStats>,
    shutdown: Arc<AtomicBool>,
}

impl std::fmt::Debug for Reactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reactor").field("id", &self.id).finish_non_exhaustive()
    }
}

impl Reactor {
    /// Builds a reactor and the two handles other threads use to reach it.
    pub fn create(
        id: usize,
        max_events: usize,
        task_queue: Arc<TaskQueue<Task>>,
        shutdown: Arc<AtomicBool>,
    ) -> std::io::Result<(Self, ConnHandle, ReactorHandle)> {
        let backend = ReactorBackend::create(max_events)?;
        let registry = backend.registry().try_clone()?;

        let (conn_tx, conn_rx) = crossbeam_channel::unbounded();
        let conn_waker = Arc::new(Waker::new(backend.registry(), CONN_CHANNEL_TOKEN)?);

        let (msg_tx, msg_rx) = crossbeam_channel::unbounded();
        let msg_waker = Arc::new(Waker::new(backend.registry(), MSG_CHANNEL_TOKEN)?);

        let stats = Arc::new(ReactorStats::new());

        let reactor = Self {
            id,
            backend,
            registry,
            connections: Slab::new(),
            conn_rx,
            _conn_waker: conn_waker.clone(),
            msg_rx,
            _msg_waker: msg_waker.clone(),
            task_queue,
            stats: stats.clone(),
            shutdown,
        };

        let conn_handle = ConnHandle {
            sender: conn_tx,
            waker: conn_waker,
        };
        let msg_handle = ReactorHandle {
            sender: msg_tx,
            waker: msg_waker,
        };

        Ok((reactor, conn_handle, msg_handle))
    }

    /// This reactor's stats counters, for reporting at shutdown.
    pub fn stats(&self) -> Arc<ReactorStats> {
        self.stats.clone()
    }

    /// Runs until the shared shutdown flag is observed. 1 ms poll timeout,
    /// per spec.md §4.5, so shutdown is noticed promptly.
    pub fn run(&mut self) {
        while !self.shutdown.load(Ordering::Relaxed) {
            self.poll_once(Duration::from_millis(1));
        }
        debug!(reactor = self.id, connections = self.connections.len(), "reactor shutting down");
    }

    fn poll_once(&mut self, timeout: Duration) {
        let Reactor {
            id,
            backend,
            registry,
            connections,
            conn_rx,
            msg_rx,
            task_queue,
            stats,
            ..
        } = self;

        let result = backend.wait(timeout, |ev| match ev.source {
            EventSource::ConnChannel => drain_conn_channel(*id, registry, connections, conn_rx),
            EventSource::MsgChannel => drain_msg_channel(registry, connections, msg_rx),
            EventSource::Connection(key) => {
                handle_connection_event(registry, connections, task_queue, stats, key, ev.mask)
            }
        });

        if let Err(e) = result {
            warn!(reactor = *id, error = %e, "reactor wait() failed");
        }
    }
}

fn drain_conn_channel(
    id: usize,
    registry: &Registry,
    connections: &mut Slab<Arc<Connection>>,
    conn_rx: &Receiver<Arc<Connection>>,
) {
    loop {
        let conn = match conn_rx.try_recv() {
            Ok(conn) => conn,
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return,
        };

        let entry = connections.vacant_entry();
        let token = Token(entry.key());
        conn.set_owning_reactor(id);
        conn.set_slot(token.0);

        match conn.register(registry, token, EventMask::READ | EventMask::ET) {
            Ok(()) => {
                entry.insert(conn);
            }
            Err(e) => {
                warn!(reactor = id, error = %e, "failed to register new connection");
                conn.release();
            }
        }
    }
}

fn drain_msg_channel(
    registry: &Registry,
    connections: &mut Slab<Arc<Connection>>,
    msg_rx: &Receiver<ReactorMessage>,
) {
    loop {
        let message = match msg_rx.try_recv() {
            Ok(message) => message,
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return,
        };

        let conn = message.connection().clone();
        if !conn.is_valid() {
            continue;
        }

        match message.kind() {
            MessageKind::ResponseReady(response) => {
                conn.stage_write(response);
                if let Some(slot) = conn.slot() {
                    let _ = conn.reregister(registry, Token(slot), EventMask::WRITE | EventMask::ET);
                }
            }
            MessageKind::CloseConn => {
                close_connection(registry, connections, &conn);
            }
        }
    }
}

fn handle_connection_event(
    registry: &Registry,
    connections: &mut Slab<Arc<Connection>>,
    task_queue: &TaskQueue<Task>,
    stats: &ReactorStats,
    key: usize,
    mask: EventMask,
) {
    let Some(conn) = connections.get(key).cloned() else {
        return;
    };
    if !conn.is_valid() {
        return;
    }

    if mask.contains(EventMask::ERROR) || mask.contains(EventMask::HUP) {
        close_connection(registry, connections, &conn);
        return;
    }

    if mask.contains(EventMask::READ) {
        read_loop(registry, connections, task_queue, stats, &conn);
    }

    if conn.is_valid() && mask.contains(EventMask::WRITE) {
        write_loop(registry, connections, stats, &conn);
    }
}

fn read_loop(
    registry: &Registry,
    connections: &mut Slab<Arc<Connection>>,
    task_queue: &TaskQueue<Task>,
    stats: &ReactorStats,
    conn: &Arc<Connection>,
) {
    loop {
        match conn.drain_read() {
            ReadOutcome::Data(bytes) => {
                stats.record_read(bytes.len());
                if let Err(crate::queue::Shutdown(_task)) =
                    task_queue.push(Task::process(conn.clone(), bytes))
                {
                    return;
                }
            }
            ReadOutcome::PeerClosed => {
                close_connection(registry, connections, conn);
                return;
            }
            ReadOutcome::WouldBlock => return,
            ReadOutcome::Error(e) => {
                debug!(connection = conn.id(), error = %e, "read error, closing");
                close_connection(registry, connections, conn);
                return;
            }
        }

        if !conn.is_valid() {
            return;
        }
    }
}

fn write_loop(
    registry: &Registry,
    connections: &mut Slab<Arc<Connection>>,
    stats: &ReactorStats,
    conn: &Arc<Connection>,
) {
    match conn.drain_write() {
        WriteOutcome::Complete(n) => {
            stats.record_write(n);
            stats.record_connection();
            if let Some(slot) = conn.slot() {
                let _ = conn.reregister(registry, Token(slot), EventMask::READ | EventMask::ET);
            }
        }
        WriteOutcome::Idle => {
            if let Some(slot) = conn.slot() {
                let _ = conn.reregister(registry, Token(slot), EventMask::READ | EventMask::ET);
            }
        }
        WriteOutcome::Partial(n) => {
            stats.record_write(n);
        }
        WriteOutcome::Error(_) => {
            close_connection(registry, connections, conn);
        }
    }
}

/// The close protocol (spec.md §4.2): mark closing, deregister, release the
/// reactor's own reference. `mark_closing` is the single idempotency gate —
/// only the caller that flips it actually runs the rest, so a connection
/// reachable from two concurrent events in one poll iteration is only torn
/// down once.
fn close_connection(registry: &Registry, connections: &mut Slab<Arc<Connection>>, conn: &Arc<Connection>) {
    if !conn.mark_closing() {
        return;
    }
    let _ = conn.deregister(registry);
    if let Some(slot) = conn.slot() {
        connections.try_remove(slot);
    }
    conn.release();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpStream as StdTcpStream;
    use std::sync::atomic::AtomicBool;
    use std::thread;

    fn spawn_reactor() -> (
        thread::JoinHandle<()>,
        ConnHandle,
        ReactorHandle,
        Arc<TaskQueue<Task>>,
        Arc<AtomicBool>,
    ) {
        let shutdown = Arc::new(AtomicBool::new(false));
        let task_queue = Arc::new(TaskQueue::new(64));
        let (mut reactor, conn_handle, msg_handle) =
            Reactor::create(0, 128, task_queue.clone(), shutdown.clone()).unwrap();
        let handle = thread::spawn(move || reactor.run());
        (handle, conn_handle, msg_handle, task_queue, shutdown)
    }

    #[test]
    fn accepted_connection_produces_a_process_task_on_read() {
        let (join, conn_handle, _msg_handle, task_queue, shutdown) = spawn_reactor();

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = StdTcpStream::connect(addr).unwrap();
        let (server, peer) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        let conn = Arc::new(Connection::new(mio::net::TcpStream::from_std(server), peer));

        conn_handle.sender.send(conn.clone()).unwrap();
        conn_handle.waker.wake().unwrap();

        client.write_all(b"ping").unwrap();

        let task = task_queue.pop().expect("expected a task within shutdown window");
        match task.kind() {
            crate::task::TaskKind::Process(bytes) => assert_eq!(bytes, b"ping"),
            crate::task::TaskKind::Close => panic!("expected Process"),
        }

        shutdown.store(true, Ordering::Relaxed);
        join.join().unwrap();
    }

    #[test]
    fn response_ready_message_is_written_back_to_the_client() {
        let (join, conn_handle, msg_handle, task_queue, shutdown) = spawn_reactor();

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = StdTcpStream::connect(addr).unwrap();
        client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let (server, peer) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        let conn = Arc::new(Connection::new(mio::net::TcpStream::from_std(server), peer));

        conn_handle.sender.send(conn.clone()).unwrap();
        conn_handle.waker.wake().unwrap();

        // Give the reactor a moment to register the connection before the
        // response-ready message races it.
        thread::sleep(Duration::from_millis(20));

        let message = ReactorMessage::response_ready(conn.clone(), b"Echo: hi".to_vec());
        msg_handle.sender.send(message).unwrap();
        msg_handle.waker.wake().unwrap();

        let mut buf = [0u8; 64];
        let n = client.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"Echo: hi");

        shutdown.store(true, Ordering::Relaxed);
        join.join().unwrap();
        drop(task_queue);
    }
}
