//! Reactor backend (C1): a portable readiness API over epoll/kqueue.
//!
//! This is a thin translation layer on top of `mio::Poll`. `mio` already
//! gives Rust the portable epoll/kqueue abstraction the reference C
//! implementation hand-rolls per platform (see
//! `original_source/linux/advanced-reactor-server/epoll_wrapper.c` and its
//! kqueue counterpart); this module supplies the spec's own `EventMask`
//! vocabulary and the `add`/`modify`/`del`/`wait` operation names on top of
//! it, so the rest of the crate never touches `mio::Interest` directly.
//!
//! `mio`'s readiness model has no separate edge-triggered knob — delivery is
//! edge-triggered-shaped for every registration — so `EventMask::ET` is
//! accepted and stored for documentation fidelity but contributes nothing to
//! the underlying `mio::Interest`. Every caller in this crate drains a
//! ready fd in a loop until it observes `WouldBlock`, exactly as the spec's
//! edge-triggered contract requires.

use std::io;
use std::time::Duration;

use mio::{Events, Poll, Registry, Token};

use crate::event::{EventMask, EventSource};

/// A single readiness notification handed back by [`ReactorBackend::wait`].
#[derive(Debug, Clone, Copy)]
pub struct ReadyEvent {
    /// What the event pertains to.
    pub source: EventSource,
    /// The readiness conditions observed.
    pub mask: EventMask,
}

/// Wraps a `mio::Poll` instance and its event scratch space.
///
/// Not `Sync`: a reactor backend is mutated only from the reactor thread
/// that owns it, by construction (see spec.md §4.1, "not thread-safe for
/// mutating operations relative to `wait`").
pub struct ReactorBackend {
    poll: Poll,
    events: Events,
}

impl std::fmt::Debug for ReactorBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactorBackend").finish_non_exhaustive()
    }
}

/// Well-known tokens reserved for the two wakeup channels every reactor
/// owns, distinct from the slab-indexed tokens used for connections.
/// Reserved token for the acceptor-to-reactor connection handoff channel.
pub const CONN_CHANNEL_TOKEN: Token = Token(usize::MAX);
/// Reserved token for the worker-to-reactor response channel.
pub const MSG_CHANNEL_TOKEN: Token = Token(usize::MAX - 1);

impl ReactorBackend {
    /// Creates a backend with a `max_events`-sized completion scratch array.
    pub fn create(max_events: usize) -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(max_events),
        })
    }

    /// A registry handle usable to register raw `mio` event sources (the
    /// listening socket, a `mio::Waker`) directly, for callers that need
    /// access below the `EventSource` abstraction.
    pub fn registry(&self) -> &Registry {
        self.poll.registry()
    }

    /// Registers `source`'s readable/writable interest under `token`. The
    /// full mask is overwritten, matching the spec's "`add` and `mod`
    /// overwrite the full mask for `fd`".
    pub fn add<S>(&self, source: &mut S, token: Token, mask: EventMask) -> io::Result<()>
    where
        S: mio::event::Source + ?Sized,
    {
        match mask.requestable().to_interest() {
            Some(interest) => self.poll.registry().register(source, token, interest),
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cannot register a source with an empty interest",
            )),
        }
    }

    /// Updates a previously-registered source's interest.
    pub fn modify<S>(&self, source: &mut S, token: Token, mask: EventMask) -> io::Result<()>
    where
        S: mio::event::Source + ?Sized,
    {
        match mask.requestable().to_interest() {
            Some(interest) => self.poll.registry().reregister(source, token, interest),
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cannot reregister a source with an empty interest",
            )),
        }
    }

    /// Deregisters `source`. Best-effort on the caller's part: on Linux,
    /// closing the fd already drops the epoll registration, so a `del` after
    /// close typically reports `ENOENT` and is ignored by callers.
    pub fn del<S>(&self, source: &mut S) -> io::Result<()>
    where
        S: mio::event::Source + ?Sized,
    {
        self.poll.registry().deregister(source)
    }

    /// Blocks up to `timeout` waiting for readiness, then invokes `handler`
    /// once per delivered event. Returns the number of events delivered;
    /// `0` is a permitted spurious wakeup.
    pub fn wait<F>(&mut self, timeout: Duration, mut handler: F) -> io::Result<usize>
    where
        F: FnMut(ReadyEvent),
    {
        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(0),
            Err(e) => return Err(e),
        }

        let mut n = 0;
        for event in self.events.iter() {
            let source = match event.token() {
                CONN_CHANNEL_TOKEN => EventSource::ConnChannel,
                MSG_CHANNEL_TOKEN => EventSource::MsgChannel,
                Token(key) => EventSource::Connection(key),
            };
            handler(ReadyEvent {
                source,
                mask: EventMask::from_mio_event(&event),
            });
            n += 1;
        }
        Ok(n)
    }
}
