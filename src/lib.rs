// Copyright 2022 Ryan Seipp
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![deny(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unused_imports
)]

//! A multi-reactor TCP server core: an acceptor distributes connections
//! round-robin across a pool of epoll/kqueue reactor threads, each of which
//! offloads request processing to a bounded worker pool and posts responses
//! back across a wakeup channel.
//!
//! The pieces assemble into a server in [`run`]; most callers building on
//! this crate only need [`cli::Args`], an [`app::Application`] impl, and
//! that function.

/// Listening socket owner and accept loop (C7).
pub mod acceptor;
/// Application hook trait and the reference echo responder (C8).
pub mod app;
/// Portable readiness API over epoll/kqueue (C1).
pub mod backend;
/// Command-line surface (C9).
pub mod cli;
/// Connection lifecycle: reference counting and the closing flag (C4).
pub mod connection;
/// Startup error taxonomy (C10).
pub mod error;
/// The event-mask vocabulary shared by the backend and its callers.
pub mod event;
/// Bounded blocking task queue (C2).
pub mod queue;
/// Reactor thread: owns a backend and two wakeup channels (C5).
pub mod reactor;
/// Reactor pool and round-robin dispatch (C6).
pub mod reactor_pool;
/// Signal installation (C11).
pub mod signals;
/// Per-reactor counters (C12).
pub mod stats;
/// Work items passed between reactors and workers.
pub mod task;
/// Worker pool (C3).
pub mod worker;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::acceptor::Acceptor;
use crate::app::Application;
use crate::cli::Args;
use crate::error::ServerError;
use crate::queue::TaskQueue;
use crate::reactor_pool::ReactorPool;
use crate::worker::WorkerPool;

/// `task_queue` capacity. Not exposed on the CLI surface (spec.md names only
/// `--port`/`--io-threads`/`--worker-threads`); sized generously relative to
/// the default thread counts so ordinary load does not touch backpressure.
const TASK_QUEUE_CAPACITY: usize = 4096;

/// `MAX_EVENTS` per reactor backend, from `original_source`'s `common.h`.
const MAX_EVENTS: usize = 2048;

/// Assembles and runs the server until `shutdown` is observed, then joins
/// every thread in order (workers, then reactors). `app` is shared across
/// every worker thread.
pub fn run(args: Args, app: Arc<dyn Application>, shutdown: Arc<AtomicBool>) -> Result<(), ServerError> {
    let task_queue = Arc::new(TaskQueue::new(TASK_QUEUE_CAPACITY));

    let (reactor_pool, reactor_handles) =
        ReactorPool::spawn(args.io_threads, MAX_EVENTS, task_queue.clone(), shutdown.clone())
            .map_err(ServerError::ReactorCreate)?;

    let worker_pool = WorkerPool::spawn(args.worker_threads, task_queue.clone(), app, reactor_handles);

    let addr: SocketAddr = ([0, 0, 0, 0], args.port).into();
    let mut acceptor = Acceptor::bind(addr, shutdown.clone())?;

    info!(
        port = args.port,
        io_threads = args.io_threads,
        worker_threads = args.worker_threads,
        "server started"
    );

    acceptor.run(&reactor_pool);

    // Orderly shutdown (spec.md §5): stop feeding the queue, let in-flight
    // tasks drain, then join workers before reactors so no reactor is torn
    // down while a worker might still post to it.
    task_queue.shutdown();
    worker_pool.join();
    reactor_pool.join();

    info!("server stopped");
    Ok(())
}

/// Gives the acceptor's blocking poll loop a moment to notice `shutdown`
/// before the caller proceeds to join threads. Exposed for integration
/// tests driving a server in a background thread.
pub fn shutdown_grace_period() -> Duration {
    Duration::from_millis(50)
}

/// Installs the two-sink `tracing` subscriber described in spec.md §6: an
/// `INFO`-and-below layer to stdout, a `WARN`/`ERROR` layer to stderr.
pub fn init_logging() {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let stdout_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stdout)
        .with_filter(EnvFilter::new("info"));
    let stderr_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new("warn"));

    let _ = tracing_subscriber::registry()
        .with(stdout_layer)
        .with(stderr_layer)
        .try_init();
}

/// Flips `flag` to request shutdown; a thin wrapper kept for call-site
/// readability at signal-handling and test call sites.
pub fn request_shutdown(flag: &AtomicBool) {
    flag.store(true, Ordering::Relaxed);
}
