//! Countdown latch used to wait until every query of a compute is accepted.

use parking_lot::{Condvar, Mutex};

use crate::timeout::{Timeout, remaining};

#[derive(Debug)]
pub struct Latch {
    count: Mutex<usize>,
    released: Condvar,
}

impl Latch {
    pub fn new(count: usize) -> Self {
        Self {
            count: Mutex::new(count),
            released: Condvar::new(),
        }
    }

    pub fn count_down(&self) {
        let mut count = self.count.lock();
        if *count > 0 {
            *count -= 1;
            if *count == 0 {
                self.released.notify_all();
            }
        }
    }

    pub fn count(&self) -> usize {
        *self.count.lock()
    }

    /// Wait for the count to reach zero. Returns whether it did.
    pub fn wait(&self, timeout: Timeout) -> bool {
        let deadline = timeout.deadline();
        let mut count = self.count.lock();
        while *count > 0 {
            match remaining(deadline) {
                None => self.released.wait(&mut count),
                Some(left) if left.is_zero() => return false,
                Some(left) => {
                    self.released.wait_for(&mut count, left);
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_wait_released_by_other_threads() {
        let latch = Arc::new(Latch::new(2));
        assert!(!latch.wait(Timeout::NonBlocking));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let latch = latch.clone();
                thread::spawn(move || latch.count_down())
            })
            .collect();
        assert!(latch.wait(Timeout::Bounded(Duration::from_secs(5))));
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(latch.count(), 0);
    }

    #[test]
    fn test_bounded_wait_expires() {
        let latch = Latch::new(1);
        assert!(!latch.wait(Timeout::Bounded(Duration::from_millis(20))));
    }
}
