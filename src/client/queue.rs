//! Thread-safe FIFO of pending jobs
// (c) 2025 Ross Younger

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A mutex-guarded FIFO. Only the head element is ever worked on; everything
/// behind it waits its turn.
///
/// All mutation of queued items happens through a [`Guard`], so the timer
/// and receive paths can never interleave on the same item.
pub(crate) struct LockedQueue<T> {
    inner: Mutex<VecDeque<T>>,
}

impl<T> LockedQueue<T> {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
        }
    }

    /// Appends an item at the back.
    pub(crate) fn push_back(&self, item: T) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(item);
    }

    /// Takes the queue lock; released when the guard drops.
    pub(crate) fn guard(&self) -> Guard<'_, T> {
        Guard {
            queue: self.inner.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }
}

/// Holds the queue lock and exposes the head element.
pub(crate) struct Guard<'a, T> {
    queue: MutexGuard<'a, VecDeque<T>>,
}

impl<T> Guard<'_, T> {
    pub(crate) fn front_mut(&mut self) -> Option<&mut T> {
        self.queue.front_mut()
    }

    pub(crate) fn pop_front(&mut self) -> Option<T> {
        self.queue.pop_front()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }
}
