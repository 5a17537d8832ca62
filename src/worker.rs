//! Worker pool (C3): `N` threads that dequeue tasks and invoke the
//! application hook.
//!
//! Grounded on `original_source/linux/advanced-reactor-server/thread_pool.c`'s
//! `worker_thread_func` loop (pop a task, dispatch on `task->type`, free the
//! task) and on the teacher's own `src/worker.rs`, which dequeues from a
//! `crossbeam_channel::Receiver` and signals its own return path through a
//! `Sender` paired with a `mio::Waker`. Here the pop side is
//! [`TaskQueue::pop`] instead of a channel (spec.md mandates blocking
//! producer/consumer semantics with a shutdown signal, which `TaskQueue`
//! supplies directly), and the return path is one `(Sender<ReactorMessage>,
//! Arc<Waker>)` pair per reactor, routed by [`Connection::owning_reactor`].

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;
use mio::Waker;

use crate::app::Application;
use crate::connection::Connection;
use crate::queue::TaskQueue;
use crate::task::{ReactorMessage, Task, TaskKind};

/// One reactor's return path: where a worker posts a finished response, and
/// how it wakes that reactor up to drain it.
#[derive(Clone)]
pub struct ReactorHandle {
    /// Where a worker posts a finished response.
    pub sender: Sender<ReactorMessage>,
    /// Interrupts the reactor's blocked `wait()` so it drains the channel.
    pub waker: Arc<Waker>,
}

impl std::fmt::Debug for ReactorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactorHandle").finish_non_exhaustive()
    }
}

/// `N` worker threads sharing one task queue and the application hook.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool").finish_non_exhaustive()
    }
}

impl WorkerPool {
    /// Spawns `count` worker threads. Each pops from `queue` until it
    /// observes shutdown, dispatches through `app`, and routes its response
    /// to the task's owning reactor via `reactors[owning_reactor_id]`.
    pub fn spawn(
        count: usize,
        queue: Arc<TaskQueue<Task>>,
        app: Arc<dyn Application>,
        reactors: Arc<Vec<ReactorHandle>>,
    ) -> Self {
        let handles = (0..count)
            .map(|worker_id| {
                let queue = queue.clone();
                let app = app.clone();
                let reactors = reactors.clone();
                thread::Builder::new()
                    .name(format!("worker-{worker_id}"))
                    .spawn(move || run(&queue, &*app, &reactors))
                    .expect("failed to spawn worker thread")
            })
            .collect();
        Self { handles }
    }

    /// Joins every worker thread. Callers must call `queue.shutdown()` first
    /// or this blocks forever.
    pub fn join(self) {
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}

fn run(queue: &TaskQueue<Task>, app: &dyn Application, reactors: &[ReactorHandle]) {
    while let Some(task) = queue.pop() {
        let conn = task.connection().clone();
        let message = match task.kind() {
            TaskKind::Process(payload) => {
                let response = app.handle(payload);
                ReactorMessage::response_ready(conn.clone(), response)
            }
            TaskKind::Close => ReactorMessage::close_conn(conn.clone()),
        };
        drop(task);
        route(&conn, message, reactors);
    }
}

fn route(conn: &Arc<Connection>, message: ReactorMessage, reactors: &[ReactorHandle]) {
    let Some(reactor_id) = conn.owning_reactor() else {
        return;
    };
    let Some(handle) = reactors.get(reactor_id) else {
        return;
    };
    if handle.sender.send(message).is_ok() {
        let _ = handle.waker.wake();
    }
}
