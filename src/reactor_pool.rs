//! Reactor pool (C6): owns every reactor thread and round-robins new
//! connections across them.
//!
//! Grounded on `original_source/linux/advanced-reactor-server/server.c`'s
//! `next_io_thread` cursor (a plain modulo counter guarded by a mutex in the
//! original; here an `AtomicUsize` suffices since the only operation is an
//! increment-and-wrap).

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::queue::TaskQueue;
use crate::reactor::{ConnHandle, Reactor};
use crate::task::Task;
use crate::worker::ReactorHandle;

/// Owns every reactor thread's join handle and the handles used to reach
/// them from the acceptor and the worker pool.
pub struct ReactorPool {
    conn_handles: Vec<ConnHandle>,
    threads: Vec<JoinHandle<()>>,
    cursor: AtomicUsize,
}

impl std::fmt::Debug for ReactorPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactorPool").finish_non_exhaustive()
    }
}

impl ReactorPool {
    /// Spawns `count` reactor threads, each with its own backend and the two
    /// wakeup channels described in [`crate::reactor::Reactor::create`].
    /// Returns the pool plus the `ReactorHandle`s the worker pool routes
    /// responses through (indexed by reactor id, matching
    /// [`crate::connection::Connection::owning_reactor`]).
    pub fn spawn(
        count: usize,
        max_events: usize,
        task_queue: Arc<TaskQueue<Task>>,
        shutdown: Arc<AtomicBool>,
    ) -> std::io::Result<(Self, Arc<Vec<ReactorHandle>>)> {
        let mut conn_handles = Vec::with_capacity(count);
        let mut msg_handles = Vec::with_capacity(count);
        let mut threads = Vec::with_capacity(count);

        for id in 0..count {
            let (mut reactor, conn_handle, msg_handle) =
                Reactor::create(id, max_events, task_queue.clone(), shutdown.clone())?;
            conn_handles.push(conn_handle);
            msg_handles.push(msg_handle);

            let thread = thread::Builder::new()
                .name(format!("reactor-{id}"))
                .spawn(move || reactor.run())?;
            threads.push(thread);
        }

        let pool = Self {
            conn_handles,
            threads,
            cursor: AtomicUsize::new(0),
        };
        Ok((pool, Arc::new(msg_handles)))
    }

    /// Returns the next reactor's connection-handoff handle and advances the
    /// round-robin cursor. Strict round-robin; no health or load feedback.
    pub fn next_reactor(&self) -> &ConnHandle {
        let i = self.cursor.fetch_add(1, Ordering::Relaxed) % self.conn_handles.len();
        &self.conn_handles[i]
    }

    /// Number of reactors in the pool.
    pub fn len(&self) -> usize {
        self.conn_handles.len()
    }

    /// Joins every reactor thread. Callers must flip the shared shutdown
    /// flag first, or this blocks forever.
    pub fn join(self) {
        for thread in self.threads {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_reactor_cycles_round_robin() {
        let shutdown = Arc::new(AtomicBool::new(false));
        let queue = Arc::new(TaskQueue::new(8));
        let (pool, _handles) = ReactorPool::spawn(3, 16, queue, shutdown.clone()).unwrap();

        let first = pool.next_reactor() as *const _;
        let second = pool.next_reactor() as *const _;
        let third = pool.next_reactor() as *const _;
        let wrapped = pool.next_reactor() as *const _;

        assert_ne!(first, second);
        assert_ne!(second, third);
        assert_eq!(first, wrapped);

        shutdown.store(true, Ordering::Relaxed);
        pool.join();
    }
}
