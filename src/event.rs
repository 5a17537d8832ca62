//! The event-mask vocabulary shared by the reactor backend and its callers.
//!
//! `EventMask` is a small bit-set over `{READ, WRITE, ERROR, HUP, RDHUP, ET}`.
//! Only `READ`, `WRITE`, and `ET` are meaningful to *request*; `ERROR`, `HUP`,
//! and `RDHUP` are delivered by the backend and requesting them is a no-op.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use mio::event::Event as MioEvent;
use mio::Interest;

/// A bit-set over the readiness conditions the reactor backend understands.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct EventMask(u8);

impl EventMask {
    /// Readable.
    pub const READ: EventMask = EventMask(1 << 0);
    /// Writable.
    pub const WRITE: EventMask = EventMask(1 << 1);
    /// An error occurred on the fd. Delivery-only.
    pub const ERROR: EventMask = EventMask(1 << 2);
    /// Peer hung up. Delivery-only.
    pub const HUP: EventMask = EventMask(1 << 3);
    /// Peer half-closed its write side. Delivery-only.
    pub const RDHUP: EventMask = EventMask(1 << 4);
    /// Request edge-triggered delivery.
    pub const ET: EventMask = EventMask(1 << 5);

    /// The empty mask.
    pub const NONE: EventMask = EventMask(0);

    /// Returns true if `self` contains every bit set in `other`.
    #[inline]
    pub fn contains(self, other: EventMask) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns true if the mask requests nothing at all.
    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// The subset of this mask that a backend is ever asked to *register*
    /// (`ERROR`/`HUP`/`RDHUP` are delivery-only and stripped here).
    #[inline]
    pub fn requestable(self) -> EventMask {
        EventMask(self.0 & (Self::READ.0 | Self::WRITE.0 | Self::ET.0))
    }

    /// Translates the requestable part of this mask to an `mio::Interest`.
    ///
    /// `mio` has no standalone edge-triggered knob — its readiness model is
    /// edge-triggered-shaped by construction — so `ET` contributes nothing
    /// to the translation beyond documentation; see `backend` module docs.
    pub(crate) fn to_interest(self) -> Option<Interest> {
        let readable = self.contains(EventMask::READ);
        let writable = self.contains(EventMask::WRITE);
        match (readable, writable) {
            (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        }
    }

    /// Decodes a delivered `mio` event back into our vocabulary.
    pub(crate) fn from_mio_event(event: &MioEvent) -> EventMask {
        let mut mask = EventMask::NONE;
        if event.is_readable() {
            mask |= EventMask::READ;
        }
        if event.is_writable() {
            mask |= EventMask::WRITE;
        }
        if event.is_error() {
            mask |= EventMask::ERROR;
        }
        if event.is_read_closed() || event.is_write_closed() {
            mask |= EventMask::HUP;
        }
        if event.is_priority() {
            mask |= EventMask::RDHUP;
        }
        mask
    }
}

impl BitOr for EventMask {
    type Output = EventMask;
    #[inline]
    fn bitor(self, rhs: EventMask) -> EventMask {
        EventMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for EventMask {
    #[inline]
    fn bitor_assign(&mut self, rhs: EventMask) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for EventMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if self.contains(EventMask::READ) {
            parts.push("READ");
        }
        if self.contains(EventMask::WRITE) {
            parts.push("WRITE");
        }
        if self.contains(EventMask::ERROR) {
            parts.push("ERROR");
        }
        if self.contains(EventMask::HUP) {
            parts.push("HUP");
        }
        if self.contains(EventMask::RDHUP) {
            parts.push("RDHUP");
        }
        if self.contains(EventMask::ET) {
            parts.push("ET");
        }
        if parts.is_empty() {
            parts.push("NONE");
        }
        write!(f, "{}", parts.join("|"))
    }
}

/// What a single readiness notification pertains to, as seen by a reactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSource {
    /// The acceptor's handoff channel for freshly accepted connections.
    ConnChannel,
    /// The worker-to-reactor message wakeup channel.
    MsgChannel,
    /// A registered connection, identified by its slab key.
    Connection(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_checks_all_requested_bits() {
        let mask = EventMask::READ | EventMask::ET;
        assert!(mask.contains(EventMask::READ));
        assert!(mask.contains(EventMask::ET));
        assert!(!mask.contains(EventMask::WRITE));
        assert!(mask.contains(EventMask::READ | EventMask::ET));
    }

    #[test]
    fn requestable_strips_delivery_only_bits() {
        let mask = EventMask::READ | EventMask::ERROR | EventMask::HUP;
        let requestable = mask.requestable();
        assert!(requestable.contains(EventMask::READ));
        assert!(!requestable.contains(EventMask::ERROR));
        assert!(!requestable.contains(EventMask::HUP));
    }

    #[test]
    fn to_interest_maps_read_write_combinations() {
        assert!(EventMask::READ.to_interest().unwrap() == Interest::READABLE);
        assert!(EventMask::WRITE.to_interest().unwrap() == Interest::WRITABLE);
        assert!((EventMask::READ | EventMask::WRITE).to_interest().unwrap()
            == Interest::READABLE | Interest::WRITABLE);
        assert!(EventMask::NONE.to_interest().is_none());
    }

    #[test]
    fn debug_renders_readable_flag_names() {
        let mask = EventMask::READ | EventMask::WRITE;
        let rendered = format!("{:?}", mask);
        assert!(rendered.contains("READ"));
        assert!(rendered.contains("WRITE"));
    }
}
