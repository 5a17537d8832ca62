//! Work items (C2/C3 glue): the unit a reactor hands to the worker pool, and
//! the unit a worker hands back.
//!
//! Grounded on `original_source/linux/advanced-reactor-server/task_queue.c`'s
//! `task_create`/`task_destroy`: the original copies the request bytes into a
//! malloc'd buffer and calls `conn_acquire` so the connection cannot be freed
//! while a task referencing it sits in the queue; `task_destroy` calls
//! `conn_release` once the worker is done. Here that pairing is expressed as
//! RAII: building a `Task` acquires the connection, and its `Drop` releases
//! it, so every code path — including a worker panicking mid-task — runs the
//! release exactly once.

use std::sync::Arc;

use crate::connection::Connection;

/// What a worker should do with a dequeued task's bytes.
#[derive(Debug)]
pub enum TaskKind {
    /// Hand `payload` to the application hook.
    Process(Vec<u8>),
    /// Post `CLOSE_CONN` to the owning reactor; no payload.
    Close,
}

/// A unit of work read off a connection, queued for a worker.
///
/// Holds its own reference on the connection for its entire lifetime: built
/// via [`Task::new`] (which calls [`Connection::acquire`]), released via
/// `Drop` (which calls [`Connection::release`]) — so an enqueued task pins
/// the connection's lifetime for exactly its queue residency, as spec.md's
/// task-creation/task-destruction contract requires.
#[derive(Debug)]
pub struct Task {
    conn: Arc<Connection>,
    kind: TaskKind,
}

impl Task {
    /// Acquires a reference on `conn` and builds a `PROCESS` task.
    pub fn process(conn: Arc<Connection>, payload: Vec<u8>) -> Self {
        conn.acquire();
        Self {
            conn,
            kind: TaskKind::Process(payload),
        }
    }

    /// Acquires a reference on `conn` and builds a `CLOSE` task.
    pub fn close(conn: Arc<Connection>) -> Self {
        conn.acquire();
        Self {
            conn,
            kind: TaskKind::Close,
        }
    }

    /// The connection this task pertains to.
    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    /// What the worker pool should do with this task.
    pub fn kind(&self) -> &TaskKind {
        &self.kind
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        self.conn.release();
    }
}

/// What a worker-to-reactor message instructs the reactor to do.
#[derive(Debug)]
pub enum MessageKind {
    /// Switch the connection's registration to `WRITE|ET`; `response` is
    /// already staged by the time this is sent.
    ResponseReady(Vec<u8>),
    /// Run the close protocol on the connection.
    CloseConn,
}

/// A worker's result, routed back to the owning reactor so it can arm the
/// connection for `WRITE` or close it.
///
/// Like [`Task`], a `ReactorMessage` holds its own reference on the
/// connection until dropped, mirroring `task_create`/`task_destroy`'s
/// acquire-on-build, release-on-destroy pairing for the return trip.
#[derive(Debug)]
pub struct ReactorMessage {
    conn: Arc<Connection>,
    kind: MessageKind,
}

impl ReactorMessage {
    /// Acquires a reference on `conn` and builds a `RESPONSE_READY` message.
    pub fn response_ready(conn: Arc<Connection>, response: Vec<u8>) -> Self {
        conn.acquire();
        Self {
            conn,
            kind: MessageKind::ResponseReady(response),
        }
    }

    /// Acquires a reference on `conn` and builds a `CLOSE_CONN` message.
    pub fn close_conn(conn: Arc<Connection>) -> Self {
        conn.acquire();
        Self {
            conn,
            kind: MessageKind::CloseConn,
        }
    }

    /// The connection this message pertains to.
    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    /// What the reactor should do with this message.
    pub fn kind(&self) -> &MessageKind {
        &self.kind
    }
}

impl Drop for ReactorMessage {
    fn drop(&mut self) {
        self.conn.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::net::TcpStream;

    fn dummy_connection() -> Arc<Connection> {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = std::net::TcpStream::connect(addr).unwrap();
        let (server, peer) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        drop(client);
        Arc::new(Connection::new(TcpStream::from_std(server), peer))
    }

    #[test]
    fn task_acquires_on_build_and_releases_on_drop() {
        let conn = dummy_connection();
        assert_eq!(conn.ref_count(), 1);
        let task = Task::process(conn.clone(), b"hello".to_vec());
        assert_eq!(conn.ref_count(), 2);
        match task.kind() {
            TaskKind::Process(bytes) => assert_eq!(bytes, b"hello"),
            TaskKind::Close => panic!("expected Process"),
        }
        drop(task);
        assert_eq!(conn.ref_count(), 1);
    }

    #[test]
    fn reactor_message_acquires_on_build_and_releases_on_drop() {
        let conn = dummy_connection();
        let msg = ReactorMessage::response_ready(conn.clone(), b"Echo: hello".to_vec());
        assert_eq!(conn.ref_count(), 2);
        match msg.kind() {
            MessageKind::ResponseReady(bytes) => assert_eq!(bytes, b"Echo: hello"),
            MessageKind::CloseConn => panic!("expected ResponseReady"),
        }
        drop(msg);
        assert_eq!(conn.ref_count(), 1);
    }

    #[test]
    fn close_conn_message_round_trips_ref_count() {
        let conn = dummy_connection();
        let msg = ReactorMessage::close_conn(conn.clone());
        assert_eq!(conn.ref_count(), 2);
        drop(msg);
        assert_eq!(conn.ref_count(), 1);
    }
}
