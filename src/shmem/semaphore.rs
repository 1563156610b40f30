//! Counting semaphore built on `parking_lot`.

use parking_lot::{Condvar, Mutex};

/// A counting semaphore.
///
/// [`wait`](Self::wait) blocks until the count is positive and decrements
/// it; [`post`](Self::post) increments the count and wakes one waiter.
/// This is the only blocking primitive in the messaging substrate: waiting
/// for a free block or for pending work resolves quickly when the region
/// is dimensioned for steady-state traffic.
pub struct Semaphore {
    count: Mutex<usize>,
    cond: Condvar,
}

impl Semaphore {
    /// Creates a semaphore with the given initial count.
    pub fn new(initial: usize) -> Self {
        Self {
            count: Mutex::new(initial),
            cond: Condvar::new(),
        }
    }

    /// Increments the count and wakes one waiter.
    pub fn post(&self) {
        let mut count = self.count.lock();
        *count += 1;
        self.cond.notify_one();
    }

    /// Blocks until the count is positive, then decrements it.
    pub fn wait(&self) {
        let mut count = self.count.lock();
        while *count == 0 {
            self.cond.wait(&mut count);
        }
        *count -= 1;
    }

    /// Decrements the count if it is positive, without blocking.
    ///
    /// Returns true if the count was decremented.
    pub fn try_wait(&self) -> bool {
        let mut count = self.count.lock();
        if *count == 0 {
            return false;
        }
        *count -= 1;
        true
    }

    /// Returns the current count without modifying it.
    pub fn value(&self) -> usize {
        *self.count.lock()
    }
}
