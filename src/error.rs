//! Startup error taxonomy (C10). Per-I/O-event errors stay as
//! `std::io::Result`, matching how [`crate::connection::Connection`]'s
//! methods already propagate them; this enum covers only the "fatal at
//! startup" bucket spec.md §7 describes.

use thiserror::Error;

/// Errors that abort the server before it starts serving traffic.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listening socket could not be bound on the requested port.
    #[error("failed to bind listening socket on port {port}: {source}")]
    Bind {
        /// The port that was requested.
        port: u16,
        /// The underlying bind failure.
        #[source]
        source: std::io::Error,
    },

    /// A reactor's epoll/kqueue backend could not be created.
    #[error("failed to create reactor backend: {0}")]
    ReactorCreate(#[source] std::io::Error),

    /// A wakeup channel's `mio::Waker` could not be created.
    #[error("failed to create wakeup channel: {0}")]
    WakerCreate(#[source] std::io::Error),

    /// An acceptor, reactor, or worker thread failed to spawn.
    #[error("failed to spawn {role} thread: {source}")]
    ThreadSpawn {
        /// The role of the thread that failed to spawn (e.g. `"reactor"`).
        role: &'static str,
        /// The underlying spawn failure.
        #[source]
        source: std::io::Error,
    },

    /// The CLI arguments failed validation.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ServerError {
    /// Exit code a fatal startup error should produce, per spec.md §6.
    pub fn exit_code(&self) -> i32 {
        1
    }
}
