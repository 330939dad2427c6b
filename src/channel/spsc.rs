//! Single-producer single-consumer bounded ring.
//!
//! # Design
//!
//! The simplest of the four rings: no per-slot metadata at all. Occupancy
//! is derived purely from the two monotonic cursors (`head - tail`), so
//! both operations are non-blocking and complete in a bounded number of
//! steps.
//!
//! Each endpoint keeps a cached copy of the remote cursor and only
//! reloads it on apparent-full (producer) or apparent-empty (consumer),
//! which keeps the common case free of cross-core cache traffic.
//!
//! # Ordering
//!
//! ```text
//! producer writes slot, release-stores head  ->  consumer acquire-loads head, reads slot
//! consumer reads slot, release-stores tail   ->  producer acquire-loads tail, reuses slot
//! ```
//!
//! # Endpoint rule
//!
//! Exactly one sender and one receiver exist per ring; each is minted at
//! most once and a second mint panics. Closure is advisory for the
//! consumer: a closed ring still drains until empty.

#[cfg(not(loom))]
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

#[cfg(loom)]
use loom::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::Arc;

use crossbeam_utils::CachePadded;

use super::{TryRecvError, TrySendError};

struct Shared<T> {
    /// Producer cursor: count of values published.
    head: CachePadded<AtomicU64>,
    /// Consumer cursor: count of values taken.
    tail: CachePadded<AtomicU64>,
    closed: AtomicBool,
    sender_taken: AtomicBool,
    receiver_taken: AtomicBool,
    buf: Box<[UnsafeCell<MaybeUninit<T>>]>,
}

// SAFETY: slots in [tail, head) are initialized and owned by the
// consumer; slots outside are owned by the producer. The cursor
// release/acquire pairs order every slot access across the two threads.
unsafe impl<T: Send> Send for Shared<T> {}
unsafe impl<T: Send> Sync for Shared<T> {}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        // Drop values still in flight.
        let capacity = self.buf.len() as u64;
        let head = self.head.load(Ordering::Relaxed);
        let mut pos = self.tail.load(Ordering::Relaxed);
        while pos != head {
            // SAFETY: [tail, head) holds initialized values; &mut self.
            unsafe {
                (*self.buf[(pos % capacity) as usize].get()).assume_init_drop();
            }
            pos = pos.wrapping_add(1);
        }
    }
}

/// SPSC ring handle: mints the endpoint pair and controls closure.
pub struct Channel<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Channel<T> {
    /// Creates a ring holding up to `capacity` values.
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be > 0");
        let buf = (0..capacity)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            shared: Arc::new(Shared {
                head: CachePadded::new(AtomicU64::new(0)),
                tail: CachePadded::new(AtomicU64::new(0)),
                closed: AtomicBool::new(false),
                sender_taken: AtomicBool::new(false),
                receiver_taken: AtomicBool::new(false),
                buf,
            }),
        }
    }

    /// Mints the producer endpoint.
    ///
    /// # Panics
    /// Panics if the sender was already minted: the ring supports exactly
    /// one producer.
    pub fn sender(&self) -> Sender<T> {
        assert!(
            !self.shared.sender_taken.swap(true, Ordering::AcqRel),
            "spsc sender already minted"
        );
        Sender {
            shared: self.shared.clone(),
            cached_tail: 0,
        }
    }

    /// Mints the consumer endpoint.
    ///
    /// # Panics
    /// Panics if the receiver was already minted: the ring supports
    /// exactly one consumer.
    pub fn receiver(&self) -> Receiver<T> {
        assert!(
            !self.shared.receiver_taken.swap(true, Ordering::AcqRel),
            "spsc receiver already minted"
        );
        Receiver {
            shared: self.shared.clone(),
            cached_head: 0,
        }
    }

    /// Closes the ring. Sticky; subsequent sends fail, the consumer may
    /// keep draining until empty.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Occupancy snapshot (racy by nature).
    pub fn len(&self) -> usize {
        let head = self.shared.head.load(Ordering::Relaxed);
        let tail = self.shared.tail.load(Ordering::Relaxed);
        head.saturating_sub(tail) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.shared.buf.len()
    }
}

/// Producer endpoint. `Send` but not `Sync`; use from one thread.
pub struct Sender<T> {
    shared: Arc<Shared<T>>,
    /// Snapshot of the consumer cursor, refreshed only on apparent-full.
    cached_tail: u64,
}

impl<T> Sender<T> {
    /// Attempts to publish `value` without blocking.
    ///
    /// Fails with [`TrySendError::Closed`] once the ring is closed and
    /// [`TrySendError::Full`] when `head - tail` equals the capacity.
    /// Never overwrites unread data.
    pub fn try_send(&mut self, value: T) -> Result<(), TrySendError<T>> {
        let shared = &*self.shared;
        if shared.closed.load(Ordering::Acquire) {
            return Err(TrySendError::Closed(value));
        }

        let capacity = shared.buf.len() as u64;
        let head = shared.head.load(Ordering::Relaxed);

        if head.wrapping_sub(self.cached_tail) >= capacity {
            self.cached_tail = shared.tail.load(Ordering::Acquire);
            if head.wrapping_sub(self.cached_tail) >= capacity {
                return Err(TrySendError::Full(value));
            }
        }

        // SAFETY: head - tail < capacity, so the consumer is not reading
        // this slot, and head is unpublished so it cannot start to.
        unsafe {
            (*shared.buf[(head % capacity) as usize].get()).write(value);
        }

        shared.head.store(head.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

/// Consumer endpoint. `Send` but not `Sync`; use from one thread.
pub struct Receiver<T> {
    shared: Arc<Shared<T>>,
    /// Snapshot of the producer cursor, refreshed only on apparent-empty.
    cached_head: u64,
}

impl<T> Receiver<T> {
    /// Attempts to take the oldest value without blocking.
    ///
    /// Returns [`TryRecvError::Empty`] when `head == tail` — also after
    /// closure, so a closed ring drains naturally.
    pub fn try_recv(&mut self) -> Result<T, TryRecvError> {
        let shared = &*self.shared;
        let capacity = shared.buf.len() as u64;
        let tail = shared.tail.load(Ordering::Relaxed);

        if tail == self.cached_head {
            self.cached_head = shared.head.load(Ordering::Acquire);
            if tail == self.cached_head {
                return Err(TryRecvError::Empty);
            }
        }

        // SAFETY: tail < head, so this slot was published by the producer
        // and will not be rewritten until tail advances past it.
        let value = unsafe { (*shared.buf[(tail % capacity) as usize].get()).assume_init_read() };

        shared.tail.store(tail.wrapping_add(1), Ordering::Release);
        Ok(value)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}



#[cfg(all(test, loom))]
mod loom_tests {
    use super::*;
    use loom::thread;

    /// FIFO order under loom's exhaustive interleaving of the two
    /// endpoints, including the full/retry path on a tiny ring.
    #[test]
    fn loom_spsc_fifo() {
        const K: u64 = 3;

        loom::model(|| {
            let ring = Channel::<u64>::with_capacity(2);
            let mut tx = ring.sender();
            let mut rx = ring.receiver();

            let producer = thread::spawn(move || {
                for i in 0..K {
                    loop {
                        match tx.try_send(i) {
                            Ok(()) => break,
                            Err(_) => loom::thread::yield_now(),
                        }
                    }
                }
            });

            let mut received = Vec::new();
            while received.len() < K as usize {
                match rx.try_recv() {
                    Ok(v) => received.push(v),
                    Err(_) => loom::thread::yield_now(),
                }
            }

            producer.join().unwrap();
            assert_eq!(received, vec![0, 1, 2]);
        });
    }
}
