//! Spin-based phase barrier.
//!
//! A single atomic counter in the style of Go's `sync.WaitGroup`: promise
//! units of work with [`WaitGroup::new`] / [`add`](WaitGroup::add), retire
//! them with [`done`](WaitGroup::done), and block in [`wait`](WaitGroup::wait)
//! until the count reaches zero. The wait is a pure spin with the CPU
//! relax hint — no kernel involvement, no fairness between waiters.
//!
//! The caller owns the accounting: exactly one `done` per promised unit.

use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

use crate::hint::relax;

/// Atomic counter used as a fan-in barrier.
pub struct WaitGroup {
    /// Cache-line isolated: `done` storms from many workers must not drag
    /// neighboring state along.
    count: CachePadded<AtomicUsize>,
}

impl WaitGroup {
    /// Creates a group already accounting for `initial` units.
    pub fn new(initial: usize) -> Self {
        Self {
            count: CachePadded::new(AtomicUsize::new(initial)),
        }
    }

    /// Promises `n` more units of work.
    pub fn add(&self, n: usize) {
        self.count.fetch_add(n, Ordering::Release);
    }

    /// Retires one unit of work.
    pub fn done(&self) {
        let prev = self.count.fetch_sub(1, Ordering::Release);
        debug_assert!(prev != 0, "wait group over-released");
    }

    /// Spins until every promised unit has been retired. Returns
    /// immediately once the count is zero, including on repeat calls.
    pub fn wait(&self) {
        while self.count.load(Ordering::Acquire) != 0 {
            relax();
        }
    }

    /// Current outstanding count (racy by nature).
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }
}

impl Default for WaitGroup {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn init_done_wait_round_trip() {
        let wg = WaitGroup::new(3);
        for _ in 0..3 {
            wg.done();
        }
        wg.wait();
        // Idempotent once zero.
        wg.wait();
        assert_eq!(wg.count(), 0);
    }

    #[test]
    fn add_extends_the_phase() {
        let wg = WaitGroup::new(1);
        wg.add(2);
        assert_eq!(wg.count(), 3);
        for _ in 0..3 {
            wg.done();
        }
        wg.wait();
    }

    #[test]
    fn waits_for_worker_threads() {
        let wg = Arc::new(WaitGroup::new(4));
        let hits = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let wg = wg.clone();
                let hits = hits.clone();
                std::thread::spawn(move || {
                    hits.fetch_add(1, Ordering::Relaxed);
                    wg.done();
                })
            })
            .collect();

        wg.wait();
        assert_eq!(hits.load(Ordering::Relaxed), 4);

        for h in handles {
            h.join().unwrap();
        }
    }
}
