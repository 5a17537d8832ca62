//! Per-reactor counters (C12), logged at shutdown.
//!
//! Grounded on `original_source/linux/advanced-reactor-server/io_thread.c`'s
//! `io_thread_t.stats_mutex` and the counters `io_thread_destroy` logs on the
//! way out (`bytes_read`, `bytes_written`, `connections_handled`).

use std::sync::Mutex;

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    bytes_read: u64,
    bytes_written: u64,
    connections_handled: u64,
}

/// Mutex-protected counters owned by a single reactor.
#[derive(Debug, Default)]
pub struct ReactorStats {
    inner: Mutex<Counters>,
}

impl ReactorStats {
    /// Zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds to the read-bytes counter.
    pub fn record_read(&self, bytes: usize) {
        self.inner.lock().unwrap().bytes_read += bytes as u64;
    }

    /// Adds to the written-bytes counter.
    pub fn record_write(&self, bytes: usize) {
        self.inner.lock().unwrap().bytes_written += bytes as u64;
    }

    /// Increments the completed-connections counter.
    pub fn record_connection(&self) {
        self.inner.lock().unwrap().connections_handled += 1;
    }

    /// `(bytes_read, bytes_written, connections_handled)`.
    pub fn snapshot(&self) -> (u64, u64, u64) {
        let c = self.inner.lock().unwrap();
        (c.bytes_read, c.bytes_written, c.connections_handled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = ReactorStats::new();
        stats.record_read(10);
        stats.record_read(5);
        stats.record_write(7);
        stats.record_connection();

        let (read, written, conns) = stats.snapshot();
        assert_eq!(read, 15);
        assert_eq!(written, 7);
        assert_eq!(conns, 1);
    }
}
