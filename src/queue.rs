//! Bounded task queue (C2): blocking producer/consumer FIFO with a shutdown
//! signal that drains waiters.
//!
//! Grounded on `original_source/linux/advanced-reactor-server/task_queue.c`,
//! translated from a manual `pthread_mutex_t` + two `pthread_cond_t`s into
//! `std::sync::{Mutex, Condvar}`.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

struct Inner<T> {
    items: VecDeque<T>,
    capacity: usize,
    shutdown: bool,
}

/// A bounded FIFO queue with blocking push/pop semantics, shared between
/// reactor threads (producers) and worker threads (consumers).
pub struct TaskQueue<T> {
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

/// Returned by [`TaskQueue::push`] when the queue has been shut down; the
/// caller keeps ownership of the item and is responsible for disposing it
/// (which, for a `Task`, releases the connection reference it pinned).
pub struct Shutdown<T>(pub T);

impl<T> std::fmt::Debug for TaskQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue").finish_non_exhaustive()
    }
}

impl<T> std::fmt::Debug for Shutdown<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Shutdown").finish()
    }
}

impl<T> TaskQueue<T> {
    /// Creates a queue bounded at `capacity` items.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "task queue capacity must be positive");
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                capacity,
                shutdown: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Blocks while the queue is full and not shut down, then enqueues
    /// `item` at the tail and wakes one waiting consumer.
    ///
    /// Returns `Err(Shutdown(item))` if shutdown was requested; ordering
    /// between concurrent pushers during the blocking wait is unspecified.
    pub fn push(&self, item: T) -> Result<(), Shutdown<T>> {
        let mut guard = self.inner.lock().unwrap();
        loop {
            if guard.shutdown {
                return Err(Shutdown(item));
            }
            if guard.items.len() < guard.capacity {
                break;
            }
            guard = self.not_full.wait(guard).unwrap();
        }
        guard.items.push_back(item);
        drop(guard);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Blocks while the queue is empty and not shut down. Returns `None`
    /// iff shutdown was requested and the queue has been drained.
    pub fn pop(&self) -> Option<T> {
        let mut guard = self.inner.lock().unwrap();
        loop {
            if let Some(item) = guard.items.pop_front() {
                drop(guard);
                self.not_full.notify_one();
                return Some(item);
            }
            if guard.shutdown {
                return None;
            }
            guard = self.not_empty.wait(guard).unwrap();
        }
    }

    /// Sets the shutdown flag and wakes every blocked producer and
    /// consumer. Idempotent. Subsequent `push`es fail; `pop`s drain
    /// whatever remains, then return `None`.
    pub fn shutdown(&self) {
        let mut guard = self.inner.lock().unwrap();
        guard.shutdown = true;
        drop(guard);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Number of items currently queued. Racy the instant it's read under
    /// concurrent access; intended for diagnostics and tests only.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().items.len()
    }

    /// True iff the queue holds no items right now.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn push_then_pop_preserves_fifo_order() {
        let q = TaskQueue::new(4);
        q.push(1).unwrap();
        q.push(2).unwrap();
        q.push(3).unwrap();
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), Some(3));
    }

    #[test]
    fn push_blocks_while_full_until_a_slot_frees() {
        let q = Arc::new(TaskQueue::new(1));
        q.push(1).unwrap();

        let q2 = q.clone();
        let handle = thread::spawn(move || {
            q2.push(2).unwrap();
        });

        thread::sleep(Duration::from_millis(50));
        assert_eq!(q.len(), 1, "second push should still be blocked");

        assert_eq!(q.pop(), Some(1));
        handle.join().unwrap();
        assert_eq!(q.pop(), Some(2));
    }

    #[test]
    fn pop_blocks_while_empty_until_an_item_arrives() {
        let q = Arc::new(TaskQueue::new(4));
        let q2 = q.clone();
        let handle = thread::spawn(move || q2.pop());

        thread::sleep(Duration::from_millis(50));
        q.push(42).unwrap();

        assert_eq!(handle.join().unwrap(), Some(42));
    }

    #[test]
    fn shutdown_drains_then_returns_none() {
        let q = TaskQueue::new(4);
        q.push(1).unwrap();
        q.shutdown();

        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), None);
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn push_after_shutdown_returns_item_to_caller() {
        let q = TaskQueue::new(4);
        q.shutdown();
        match q.push(7) {
            Err(Shutdown(item)) => assert_eq!(item, 7),
            Ok(()) => panic!("push after shutdown should fail"),
        }
    }

    #[test]
    fn shutdown_wakes_a_blocked_pop() {
        let q = Arc::new(TaskQueue::<i32>::new(4));
        let q2 = q.clone();
        let handle = thread::spawn(move || q2.pop());

        thread::sleep(Duration::from_millis(50));
        q.shutdown();

        assert_eq!(handle.join().unwrap(), None);
    }

    #[test]
    fn shutdown_wakes_a_blocked_push() {
        let q = Arc::new(TaskQueue::new(1));
        q.push(1).unwrap();

        let q2 = q.clone();
        let handle = thread::spawn(move || q2.push(2));

        thread::sleep(Duration::from_millis(50));
        q.shutdown();

        match handle.join().unwrap() {
            Err(Shutdown(item)) => assert_eq!(item, 2),
            Ok(()) => panic!("push should observe shutdown"),
        }
    }
}
